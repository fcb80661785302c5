//! WebSocket connection driver.
//!
//! One `SessionDriver` task owns the socket for a client session: it connects,
//! restores subscriptions, pumps frames into the bounded queue, answers
//! pings, watches the heartbeat, and on loss reconnects with exponential
//! backoff until cancelled or the registry is empty.

use crate::client::ClientInner;
use crate::error::{WsError, WsResult};
use crate::events::Precision;
use crate::message::SubscriptionRequest;
use dlob_core::NetworkEnv;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Endpoint URL per network environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_mainnet_url")]
    pub mainnet_beta: String,
    #[serde(default = "default_devnet_url")]
    pub devnet: String,
}

fn default_mainnet_url() -> String {
    NetworkEnv::MainnetBeta.default_ws_url().to_string()
}

fn default_devnet_url() -> String {
    NetworkEnv::Devnet.default_ws_url().to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mainnet_beta: default_mainnet_url(),
            devnet: default_devnet_url(),
        }
    }
}

impl EndpointConfig {
    pub fn url_for(&self, env: NetworkEnv) -> &str {
        match env {
            NetworkEnv::MainnetBeta => &self.mainnet_beta,
            NetworkEnv::Devnet => &self.devnet,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Initial network environment.
    #[serde(default)]
    pub network: NetworkEnv,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    /// First reconnect delay; doubles per attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// How often the heartbeat is checked.
    #[serde(default = "default_heartbeat_check_interval_ms")]
    pub heartbeat_check_interval_ms: u64,
    /// Silence after which the connection is recycled.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Inbound frame queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub precision: Precision,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_check_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    15_000
}

fn default_queue_capacity() -> usize {
    1_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            network: NetworkEnv::default(),
            endpoints: EndpointConfig::default(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_check_interval_ms: default_heartbeat_check_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            precision: Precision::default(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket and nothing to do.
    Idle,
    /// Socket being established.
    Connecting,
    /// Socket open.
    Connected,
    /// Backoff timer pending before the next attempt.
    Reconnecting,
    /// Socket closed.
    Disconnected,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        Self::Idle,
        Self::Connecting,
        Self::Connected,
        Self::Reconnecting,
        Self::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
///
/// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay)
}

/// Why a single connection ended.
enum SessionEnd {
    /// Torn down by the client; no reconnect.
    Cancelled,
    /// Lost; reconnect if there is still something to stream.
    Lost(WsError),
}

/// Socket owner for one client session.
pub(crate) struct SessionDriver {
    pub(crate) client: Weak<ClientInner>,
    pub(crate) id: u64,
    pub(crate) url: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) outbound_rx: mpsc::UnboundedReceiver<SubscriptionRequest>,
    pub(crate) reconnect_base_delay_ms: u64,
    pub(crate) reconnect_max_delay_ms: u64,
}

impl SessionDriver {
    pub(crate) async fn run(mut self) {
        loop {
            let reason = match self.connect_once().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost(reason) => reason,
            };

            let Some(client) = self.client.upgrade() else {
                break;
            };
            let Some(attempt) = client.on_session_lost(self.id, &reason) else {
                break;
            };
            drop(client);

            let delay = backoff_delay(
                attempt,
                self.reconnect_base_delay_ms,
                self.reconnect_max_delay_ms,
            );
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                url = %self.url,
                "Reconnecting"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let Some(client) = self.client.upgrade() else {
                break;
            };
            if !client.on_reconnect_attempt(self.id) {
                break;
            }
        }
        debug!(session = self.id, "Session driver exited");
    }

    async fn connect_once(&mut self) -> SessionEnd {
        match self.client.upgrade() {
            Some(client) => client.heartbeat.reset(),
            None => return SessionEnd::Cancelled,
        }

        info!(url = %self.url, session = self.id, "Connecting to DLOB stream");

        let ws_stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = connect_async_tls_with_config(self.url.as_str(), None, true, None) => {
                match result {
                    Ok((ws_stream, _response)) => ws_stream,
                    Err(e) => {
                        warn!(?e, url = %self.url, "Connection attempt failed");
                        return SessionEnd::Lost(WsError::ConnectionFailed(e.to_string()));
                    }
                }
            }
        };
        let (mut write, mut read) = ws_stream.split();

        // Intents queued before this socket existed are superseded by the
        // full re-subscription below.
        while self.outbound_rx.try_recv().is_ok() {}

        let Some(client) = self.client.upgrade() else {
            return SessionEnd::Cancelled;
        };
        let Some(keys) = client.on_connected(self.id) else {
            return SessionEnd::Cancelled;
        };
        let check_interval = client.heartbeat.check_interval();

        let notify = Arc::new(Notify::new());
        let drain_token = self.cancel.child_token();
        tokio::spawn(drain_frames(
            Arc::downgrade(&client),
            notify.clone(),
            drain_token.clone(),
        ));
        let _drain_guard = drain_token.drop_guard();
        drop(client);

        info!(count = keys.len(), "Restoring subscriptions");
        for key in &keys {
            if let Err(e) = send_request(&mut write, &SubscriptionRequest::subscribe(key)).await {
                return SessionEnd::Lost(e);
            }
        }

        let mut heartbeat_check = interval_at(Instant::now() + check_interval, check_interval);
        heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    while let Ok(request) = self.outbound_rx.try_recv() {
                        if send_request(&mut write, &request).await.is_err() {
                            break;
                        }
                    }
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Close frame not sent during teardown");
                    }
                    return SessionEnd::Cancelled;
                }

                Some(request) = self.outbound_rx.recv() => {
                    if let Err(e) = send_request(&mut write, &request).await {
                        return SessionEnd::Lost(e);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.enqueue(text, &notify),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => self.enqueue(text, &notify),
                            Err(e) => warn!(?e, "Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Lost(e.into());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return SessionEnd::Lost(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return SessionEnd::Lost(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return SessionEnd::Lost(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        Some(Ok(_)) => {}
                    }
                }

                _ = heartbeat_check.tick() => {
                    let Some(client) = self.client.upgrade() else {
                        return SessionEnd::Cancelled;
                    };
                    if client.heartbeat.is_timed_out() {
                        let timeout_ms = client.heartbeat.timeout().as_millis() as u64;
                        warn!(
                            silence_ms = client.heartbeat.silence().as_millis() as u64,
                            timeout_ms,
                            "Heartbeat timeout, recycling connection"
                        );
                        if let Err(e) = write.send(Message::Close(None)).await {
                            debug!(?e, "Close frame not sent after heartbeat timeout");
                        }
                        return SessionEnd::Lost(WsError::HeartbeatTimeout(timeout_ms));
                    }
                }
            }
        }
    }

    fn enqueue(&self, text: String, notify: &Notify) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let overflow = client.queue.lock().push(text);
        notify.notify_one();

        if let Some(event) = overflow {
            debug!(
                queue_depth = event.queue_depth,
                dropped = event.dropped_messages,
                "Inbound queue full, dropped oldest frame"
            );
            client.listeners.backpressure.emit(&event);
        }
    }
}

async fn send_request(write: &mut WsSink, request: &SubscriptionRequest) -> WsResult<()> {
    let text = request.to_text()?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| WsError::SendFailed(e.to_string()))?;
    debug!(
        request_type = ?request.request_type,
        channel = %request.channel,
        market_type = %request.market_type,
        market = %request.market,
        "Sent subscription request"
    );
    Ok(())
}

/// Process queued frames one at a time, yielding between frames.
async fn drain_frames(client: Weak<ClientInner>, notify: Arc<Notify>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = notify.notified() => {}
        }

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(client) = client.upgrade() else {
                return;
            };
            let next = client.queue.lock().pop();
            let Some(frame) = next else {
                break;
            };
            client.process_frame(&frame);
            drop(client);
            tokio::task::yield_now().await;
        }
    }
}
