//! DLOB stream monitor.
//!
//! Subscribes the configured markets over one multiplexed connection:
//! - Logs mark prices and trade fills
//! - Feeds connection, heartbeat and queue metrics
//! - Disconnects cleanly on Ctrl-C

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, MarketConfig};
pub use error::{AppError, AppResult};
