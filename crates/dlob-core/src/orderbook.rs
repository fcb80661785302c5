//! Orderbook level types and mark price derivation.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// One price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Size,
}

impl BookLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Derive a single mark price for display.
///
/// Bid/ask midpoint when both sides exist, else the oracle price, else
/// whichever side is present.
pub fn mark_price(
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    oracle: Option<Price>,
) -> Option<Price> {
    match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => Some(bid.midpoint(ask)),
        _ => oracle.or(best_bid).or(best_ask),
    }
}
