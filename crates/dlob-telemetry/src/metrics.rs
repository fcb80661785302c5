//! Prometheus metrics for the DLOB stream client.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a startup configuration error. These
//! panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, register_int_gauge, Counter, CounterVec, Encoder, Gauge, GaugeVec,
    Histogram, IntGauge, TextEncoder,
};

/// Connection state labels, in lifecycle order.
pub const WS_STATES: [&str; 5] = [
    "idle",
    "connecting",
    "connected",
    "reconnecting",
    "disconnected",
];

/// WebSocket connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "dlob_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Current connection state.
/// Labels: state (idle/connecting/connected/reconnecting/disconnected)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "dlob_ws_state",
        "WebSocket state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnect attempts.
pub static WS_RECONNECT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dlob_ws_reconnect_total",
        "Total WebSocket reconnection attempts"
    )
    .unwrap()
});

/// Interval between heartbeat envelopes.
pub static HEARTBEAT_DELTA_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "dlob_heartbeat_delta_ms",
        "Milliseconds between consecutive heartbeat envelopes",
        vec![100.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 15000.0, 30000.0]
    )
    .unwrap()
});

/// Inbound queue depth at the last backpressure event.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("dlob_queue_depth", "Inbound frame queue depth").unwrap()
});

/// Cumulative frames dropped by the inbound queue.
pub static QUEUE_DROPPED_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "dlob_queue_dropped_total",
        "Cumulative inbound frames dropped on overflow"
    )
    .unwrap()
});

/// Data events delivered.
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dlob_events_total",
        "Total data events delivered to handlers",
        &["channel", "market"]
    )
    .unwrap()
});

/// Latest derived mark price.
pub static MARK_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "dlob_mark_price",
        "Latest mark price (midpoint, else oracle, else single side)",
        &["market"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set connection state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in &WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "connected" { 1.0 } else { 0.0 });
    }

    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    pub fn heartbeat(delta_ms: Option<u64>) {
        if let Some(delta) = delta_ms {
            HEARTBEAT_DELTA_MS.observe(delta as f64);
        }
    }

    pub fn backpressure(queue_depth: usize, dropped_total: u64) {
        QUEUE_DEPTH.set(queue_depth as i64);
        QUEUE_DROPPED_TOTAL.set(dropped_total as i64);
    }

    pub fn event(channel: &str, market: &str) {
        EVENTS_TOTAL.with_label_values(&[channel, market]).inc();
    }

    pub fn mark_price(market: &str, price: f64) {
        MARK_PRICE.with_label_values(&[market]).set(price);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
