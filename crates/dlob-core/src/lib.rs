//! Core domain types for the DLOB stream client.
//!
//! This crate provides the vocabulary shared by the stream client and its callers:
//! - `SubscriptionKey`: channel × market type × market name
//! - `Price`, `Size`: precision-scaled decimal types
//! - `BookLevel`, `mark_price`: orderbook levels and mark price derivation
//! - `TradeFill`: a single fill from the trades channel
//! - `NetworkEnv`: network environment selecting the endpoint

pub mod decimal;
pub mod error;
pub mod market;
pub mod network;
pub mod orderbook;
pub mod trade;

pub use decimal::{Price, Size, WireDecimal, BASE_PRECISION, PRICE_PRECISION, QUOTE_PRECISION};
pub use error::{CoreError, Result};
pub use market::{Channel, MarketType, SubscriptionKey};
pub use network::NetworkEnv;
pub use orderbook::{mark_price, BookLevel};
pub use trade::TradeFill;
