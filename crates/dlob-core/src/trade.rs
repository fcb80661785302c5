//! Trade fill record from the trades channel.

use crate::market::MarketType;
use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single fill, unscaled to human units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFill {
    /// Fill timestamp (unix seconds, as reported by the server).
    pub ts: Option<i64>,
    pub market_index: Option<u16>,
    pub market_type: Option<MarketType>,
    pub filler: Option<String>,
    pub taker: Option<String>,
    pub maker: Option<String>,
    pub taker_fee: Option<Decimal>,
    pub maker_fee: Option<Decimal>,
    pub base_asset_amount_filled: Option<Size>,
    pub quote_asset_amount_filled: Option<Decimal>,
    pub oracle_price: Option<Price>,
    pub slot: Option<u64>,
    /// e.g. "fill".
    pub action: Option<String>,
    /// "long" or "short".
    pub taker_order_direction: Option<String>,
}

impl TradeFill {
    /// Average fill price (quote / base), if both amounts are known.
    pub fn fill_price(&self) -> Option<Price> {
        let base = self.base_asset_amount_filled?;
        let quote = self.quote_asset_amount_filled?;
        if base.is_zero() {
            return None;
        }
        quote.checked_div(base.inner()).map(Price::new)
    }
}
