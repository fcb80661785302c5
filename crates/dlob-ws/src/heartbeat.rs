//! Heartbeat monitoring for the stream connection.
//!
//! The server pushes `heartbeat` envelopes on a fixed cadence. The driver
//! checks on an interval whether one arrived within the timeout; if not, the
//! connection is treated as half-open and recycled.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct HeartbeatState {
    /// When monitoring (re)started for the current connection attempt.
    armed_at: Instant,
    last_heartbeat: Option<Instant>,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Tracks the last heartbeat and detects silence.
pub struct HeartbeatMonitor {
    check_interval: Duration,
    timeout: Duration,
    state: RwLock<HeartbeatState>,
}

impl HeartbeatMonitor {
    pub fn new(check_interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            check_interval: Duration::from_millis(check_interval_ms.max(1)),
            timeout: Duration::from_millis(timeout_ms),
            state: RwLock::new(HeartbeatState {
                armed_at: Instant::now(),
                last_heartbeat: None,
                last_heartbeat_at: None,
            }),
        }
    }

    /// Reset heartbeat state (called on each connection attempt).
    pub fn reset(&self) {
        *self.state.write() = HeartbeatState {
            armed_at: Instant::now(),
            last_heartbeat: None,
            last_heartbeat_at: None,
        };
    }

    /// Record a heartbeat; returns milliseconds since the previous one.
    pub fn record_heartbeat(&self) -> Option<u64> {
        let now = Instant::now();
        let mut state = self.state.write();
        let delta = state
            .last_heartbeat
            .map(|prev| now.duration_since(prev).as_millis() as u64);
        state.last_heartbeat = Some(now);
        state.last_heartbeat_at = Some(Utc::now());
        delta
    }

    /// Whether no heartbeat arrived within the timeout since the last one
    /// (or since the monitor was armed).
    pub fn is_timed_out(&self) -> bool {
        self.silence() > self.timeout
    }

    /// Time since the last heartbeat, or since arming if none yet.
    pub fn silence(&self) -> Duration {
        let state = self.state.read();
        state.last_heartbeat.unwrap_or(state.armed_at).elapsed()
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_heartbeat_at
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
