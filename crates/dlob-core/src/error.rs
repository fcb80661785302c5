//! Error types for dlob-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Unknown market type: {0}")]
    UnknownMarketType(String),

    #[error("Unknown network environment: {0}")]
    UnknownNetwork(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
