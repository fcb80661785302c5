//! WebSocket client for the DLOB orderbook and trades stream.
//!
//! Provides one multiplexed connection per client with:
//! - Lazy connect on the first subscription, teardown on the last
//! - Automatic reconnection with exponential backoff and full re-subscription
//! - Heartbeat envelope monitoring for half-open connections
//! - Bounded drop-oldest inbound queue with backpressure events

pub mod client;
pub mod connection;
pub mod disposer;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod message;
pub mod queue;
pub mod subscription;

pub use client::{ClientStats, StreamClient};
pub use connection::{backoff_delay, ConnectionConfig, ConnectionState, EndpointConfig};
pub use disposer::Disposer;
pub use error::{WsError, WsResult};
pub use events::{
    BackpressureEvent, ConnectionEvent, HeartbeatEvent, ListenerId, Listeners, OrderbookEvent,
    OrderbookHandler, Precision, TradeEvent, TradeHandler,
};
pub use message::{parse_frame, InboundFrame, RequestType, SubscriptionRequest};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
