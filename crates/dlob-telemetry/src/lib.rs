//! Prometheus metrics and structured logging for the DLOB stream client.
//!
//! - Prometheus metrics for connection state, heartbeats, queue pressure
//!   and per-market events
//! - Structured JSON logging with tracing in production, pretty otherwise

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
