//! Multiplexed DLOB stream client.
//!
//! `StreamClient` keeps at most one socket per client and multiplexes every
//! orderbook/trades subscription over it. The socket is created lazily on the
//! first subscription and torn down when the last one goes away.
//!
//! Lock order: `state` before `queue`. No lock is held while callbacks run
//! or across an `.await`.

use crate::connection::{ConnectionConfig, ConnectionState, SessionDriver};
use crate::disposer::Disposer;
use crate::error::{WsError, WsResult};
use crate::events::{
    invoke_isolated, BackpressureEvent, ConnectionEvent, EventListeners, HeartbeatEvent,
    OrderbookEvent, OrderbookHandler, TradeEvent, TradeHandler,
};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{parse_frame, InboundFrame, OrderbookPayload, SubscriptionRequest, TradesPayload};
use crate::queue::MessageQueue;
use crate::subscription::{Handler, HandlerId, Removal, SubscriptionRegistry};
use chrono::{DateTime, Utc};
use dlob_core::{Channel, MarketType, NetworkEnv, SubscriptionKey};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStats {
    pub state: ConnectionState,
    pub network: NetworkEnv,
    pub endpoint: String,
    pub subscriptions: usize,
    pub active_subscriptions: usize,
    pub queue_depth: usize,
    pub dropped_messages: u64,
    pub reconnect_attempt: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_heartbeat_age_ms: Option<u64>,
}

/// Control side of a running session driver.
struct SessionHandle {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<SubscriptionRequest>,
}

pub(crate) struct ClientState {
    connection: ConnectionState,
    network: NetworkEnv,
    url: String,
    registry: SubscriptionRegistry,
    session: Option<SessionHandle>,
    reconnect_attempt: u32,
    next_session_id: u64,
}

impl ClientState {
    fn owns(&self, session_id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected && self.session.is_some()
    }

    /// Hand an intent to the driver; false if there is no session.
    fn send(&self, request: SubscriptionRequest) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.outbound.send(request).is_ok())
    }

    fn event(&self) -> ConnectionEvent {
        ConnectionEvent {
            state: self.connection,
            url: self.url.clone(),
            attempt: self.reconnect_attempt,
            at: Utc::now(),
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionEvent> {
        if self.connection == next {
            return None;
        }
        debug!(from = %self.connection, to = %next, "Connection state transition");
        self.connection = next;
        Some(self.event())
    }
}

pub(crate) struct ClientInner {
    config: ConnectionConfig,
    state: Mutex<ClientState>,
    pub(crate) queue: Mutex<MessageQueue>,
    pub(crate) heartbeat: HeartbeatMonitor,
    pub(crate) listeners: EventListeners,
    runtime: Handle,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().session.take() {
            session.cancel.cancel();
        }
    }
}

impl ClientInner {
    fn emit_connection(&self, events: impl IntoIterator<Item = ConnectionEvent>) {
        for event in events {
            self.listeners.connection.emit(&event);
        }
    }

    /// Spawn a driver for a fresh session. Caller holds the state lock.
    fn start_session(self: &Arc<Self>, state: &mut ClientState) -> Option<ConnectionEvent> {
        state.next_session_id += 1;
        let id = state.next_session_id;
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        state.session = Some(SessionHandle {
            id,
            cancel: cancel.clone(),
            outbound,
        });
        state.reconnect_attempt = 0;

        let driver = SessionDriver {
            client: Arc::downgrade(self),
            id,
            url: state.url.clone(),
            cancel,
            outbound_rx,
            reconnect_base_delay_ms: self.config.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.config.reconnect_max_delay_ms,
        };
        self.runtime.spawn(driver.run());
        info!(session = id, url = %state.url, "Started stream session");

        state.transition(ConnectionState::Connecting)
    }

    /// Close the socket, stop timers, drop queued frames. Caller holds the
    /// state lock.
    fn teardown(&self, state: &mut ClientState, next: ConnectionState) -> Option<ConnectionEvent> {
        if let Some(session) = state.session.take() {
            session.cancel.cancel();
            debug!(session = session.id, "Cancelled stream session");
        }
        state.registry.deactivate_all();
        self.queue.lock().clear();
        state.reconnect_attempt = 0;
        state.transition(next)
    }

    fn subscribe(self: &Arc<Self>, key: SubscriptionKey, handler: Handler) -> Disposer {
        let mut events = Vec::new();
        let registration = {
            let mut state = self.state.lock();
            let registration = state.registry.register(key.clone(), handler);

            if state.session.is_none() {
                events.extend(self.start_session(&mut state));
            } else if registration.new_record && state.is_connected() {
                if state.send(SubscriptionRequest::subscribe(&key)) {
                    state.registry.mark_active(&key);
                }
            }
            registration
        };

        debug!(
            %key,
            handler_id = registration.handler_id,
            new_record = registration.new_record,
            coalesced = registration.coalesced,
            "Registered subscription handler"
        );
        self.emit_connection(events);

        let weak = Arc::downgrade(self);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe(&key, registration.handler_id);
            }
        })
    }

    fn unsubscribe(&self, key: &SubscriptionKey, handler_id: HandlerId) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            match state.registry.unregister(key, handler_id) {
                Removal::NotFound => return,
                Removal::HandlerRemoved => {
                    debug!(%key, handler_id, "Removed subscription handler");
                }
                Removal::RecordRemoved { was_active } => {
                    if was_active && state.is_connected() {
                        state.send(SubscriptionRequest::unsubscribe(key));
                    }
                    info!(%key, "Subscription removed");

                    if state.registry.is_empty() {
                        info!("No subscriptions left, closing stream");
                        events.extend(self.teardown(&mut state, ConnectionState::Idle));
                    }
                }
            }
        }
        self.emit_connection(events);
    }

    /// Socket open. Returns the keys to re-subscribe, or `None` if the session
    /// was superseded.
    pub(crate) fn on_connected(&self, session_id: u64) -> Option<Vec<SubscriptionKey>> {
        let (keys, event) = {
            let mut state = self.state.lock();
            if !state.owns(session_id) {
                return None;
            }
            state.reconnect_attempt = 0;
            let keys = state.registry.activate_all();
            (keys, state.transition(ConnectionState::Connected))
        };
        self.heartbeat.reset();
        info!(session = session_id, "Connected to DLOB stream");
        self.emit_connection(event);
        Some(keys)
    }

    /// Socket lost. Returns the next reconnect attempt number, or `None` if
    /// the driver should stop.
    pub(crate) fn on_session_lost(&self, session_id: u64, reason: &WsError) -> Option<u32> {
        let mut events = Vec::new();
        let attempt = {
            let mut state = self.state.lock();
            if !state.owns(session_id) {
                return None;
            }
            warn!(session = session_id, %reason, "Stream connection lost");

            state.registry.deactivate_all();
            self.queue.lock().clear();
            events.extend(state.transition(ConnectionState::Disconnected));

            if state.registry.is_empty() {
                state.session = None;
                events.extend(state.transition(ConnectionState::Idle));
                None
            } else {
                state.reconnect_attempt += 1;
                let attempt = state.reconnect_attempt;
                events.extend(state.transition(ConnectionState::Reconnecting));
                Some(attempt)
            }
        };
        self.emit_connection(events);
        attempt
    }

    /// Backoff elapsed. Returns false if the driver should stop.
    pub(crate) fn on_reconnect_attempt(&self, session_id: u64) -> bool {
        let (proceed, event) = {
            let mut state = self.state.lock();
            if !state.owns(session_id) {
                return false;
            }
            if state.registry.is_empty() {
                state.session = None;
                (false, state.transition(ConnectionState::Idle))
            } else {
                (true, state.transition(ConnectionState::Connecting))
            }
        };
        self.emit_connection(event);
        proceed
    }

    /// Decode and dispatch one queued frame.
    pub(crate) fn process_frame(&self, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match frame {
            InboundFrame::Heartbeat { ts } => {
                let event = HeartbeatEvent {
                    received_at: Utc::now(),
                    delta_ms: self.heartbeat.record_heartbeat(),
                    server_ts: ts,
                };
                self.listeners.heartbeat.emit(&event);
            }
            InboundFrame::Orderbook { tag, payload, ts } => {
                self.dispatch_orderbook(tag, &payload, ts);
            }
            InboundFrame::Trades { tag, payload, ts } => {
                self.dispatch_trades(tag, &payload, ts);
            }
            InboundFrame::Unrecognized { tag } => {
                debug!(?tag, "Ignoring frame on unhandled channel");
            }
        }
    }

    fn resolve(
        &self,
        channel: Channel,
        explicit_type: Option<MarketType>,
        explicit_name: Option<&str>,
        tag: &str,
    ) -> Option<SubscriptionKey> {
        let market_type = explicit_type.or_else(|| MarketType::infer_from_tag(tag))?;
        let name = explicit_name.or_else(|| MarketType::market_name_in_tag(tag));
        self.state
            .lock()
            .registry
            .resolve(channel, market_type, name, tag)
    }

    fn dispatch_orderbook(&self, tag: String, payload: &OrderbookPayload, ts: Option<i64>) {
        let Some(key) = self.resolve(
            Channel::Orderbook,
            payload.market_type(),
            payload.market_name(),
            &tag,
        ) else {
            debug!(%tag, "No subscription for orderbook frame");
            return;
        };

        let event = match OrderbookEvent::from_payload(key, tag, payload, ts, &self.config.precision)
        {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed orderbook payload");
                return;
            }
        };

        let handlers = self.state.lock().registry.record_delivery(
            &event.key,
            &event.channel_tag,
            event.slot,
            event.ts,
        );
        for handler in handlers {
            if let Handler::Orderbook(handler) = handler {
                invoke_isolated("orderbook", || handler(&event));
            }
        }
    }

    fn dispatch_trades(&self, tag: String, payload: &TradesPayload, ts: Option<i64>) {
        let Some(key) = self.resolve(
            Channel::Trades,
            payload.market_type(),
            payload.market_name(),
            &tag,
        ) else {
            debug!(%tag, "No subscription for trades frame");
            return;
        };

        let event = match TradeEvent::from_payload(key, tag, payload, ts, &self.config.precision) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed trades payload");
                return;
            }
        };

        let handlers = self.state.lock().registry.record_delivery(
            &event.key,
            &event.channel_tag,
            event.slot,
            event.ts,
        );
        for handler in handlers {
            if let Handler::Trades(handler) = handler {
                invoke_isolated("trades", || handler(&event));
            }
        }
    }
}

/// Handle to a DLOB stream connection.
///
/// Cheap to clone; clones share the same socket and registry. The socket is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

impl StreamClient {
    /// Create a client. Nothing connects until the first subscription.
    ///
    /// Must be called from within a tokio runtime; the client spawns its
    /// session tasks onto that runtime.
    pub fn new(config: ConnectionConfig) -> WsResult<Self> {
        let runtime = Handle::try_current().map_err(|_| WsError::NoRuntime)?;
        let url = config.endpoints.url_for(config.network).to_string();

        let inner = ClientInner {
            state: Mutex::new(ClientState {
                connection: ConnectionState::Idle,
                network: config.network,
                url,
                registry: SubscriptionRegistry::new(),
                session: None,
                reconnect_attempt: 0,
                next_session_id: 0,
            }),
            queue: Mutex::new(MessageQueue::new(config.queue_capacity)),
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_check_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            listeners: EventListeners::new(),
            runtime,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Switch network environment.
    ///
    /// No-op if the resolved URL is unchanged. Otherwise the current socket
    /// is closed and, if subscriptions exist, a new one is opened against the
    /// new endpoint and every subscription is re-sent.
    pub fn set_endpoint(&self, env: NetworkEnv) {
        let url = self.inner.config.endpoints.url_for(env).to_string();
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.network = env;
            if state.url == url {
                debug!(%url, "Endpoint unchanged");
                return;
            }
            info!(network = %env, %url, "Switching endpoint");
            state.url = url;

            if state.session.is_some() {
                events.extend(self.inner.teardown(&mut state, ConnectionState::Disconnected));
            }
            if !state.registry.is_empty() {
                events.extend(self.inner.start_session(&mut state));
            }
        }
        self.inner.emit_connection(events);
    }

    /// Register an orderbook handler for `market`.
    pub fn subscribe_orderbook<F>(
        &self,
        market: impl Into<String>,
        market_type: MarketType,
        handler: F,
    ) -> Disposer
    where
        F: Fn(&OrderbookEvent) + Send + Sync + 'static,
    {
        self.subscribe_orderbook_handler(market, market_type, Arc::new(handler))
    }

    /// Register a shared orderbook handler. Registering the same `Arc` twice
    /// under one key is coalesced.
    pub fn subscribe_orderbook_handler(
        &self,
        market: impl Into<String>,
        market_type: MarketType,
        handler: OrderbookHandler,
    ) -> Disposer {
        let key = SubscriptionKey::orderbook(market_type, market);
        self.inner.subscribe(key, Handler::Orderbook(handler))
    }

    /// Register a trades handler for `market`.
    pub fn subscribe_trades<F>(
        &self,
        market: impl Into<String>,
        market_type: MarketType,
        handler: F,
    ) -> Disposer
    where
        F: Fn(&TradeEvent) + Send + Sync + 'static,
    {
        self.subscribe_trades_handler(market, market_type, Arc::new(handler))
    }

    /// Register a shared trades handler. Registering the same `Arc` twice
    /// under one key is coalesced.
    pub fn subscribe_trades_handler(
        &self,
        market: impl Into<String>,
        market_type: MarketType,
        handler: TradeHandler,
    ) -> Disposer {
        let key = SubscriptionKey::trades(market_type, market);
        self.inner.subscribe(key, Handler::Trades(handler))
    }

    pub fn on_connection<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.connection.add(Arc::new(listener));
        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.connection.remove(id);
            }
        })
    }

    pub fn on_heartbeat<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&HeartbeatEvent) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.heartbeat.add(Arc::new(listener));
        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.heartbeat.remove(id);
            }
        })
    }

    pub fn on_backpressure<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&BackpressureEvent) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.backpressure.add(Arc::new(listener));
        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.backpressure.remove(id);
            }
        })
    }

    /// Close the socket and stop all timers, keeping every subscription.
    ///
    /// A later subscribe or endpoint change reconnects and restores them.
    pub fn disconnect(&self) {
        let event = {
            let mut state = self.inner.state.lock();
            let next = if state.registry.is_empty() {
                ConnectionState::Idle
            } else {
                ConnectionState::Disconnected
            };
            info!(subscriptions = state.registry.len(), "Disconnecting stream");
            self.inner.teardown(&mut state, next)
        };
        self.inner.emit_connection(event);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn endpoint(&self) -> String {
        self.inner.state.lock().url.clone()
    }

    pub fn network(&self) -> NetworkEnv {
        self.inner.state.lock().network
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ClientStats {
        let state = self.inner.state.lock();
        let queue = self.inner.queue.lock();
        let last_heartbeat_at = self.inner.heartbeat.last_heartbeat_at();

        ClientStats {
            state: state.connection,
            network: state.network,
            endpoint: state.url.clone(),
            subscriptions: state.registry.len(),
            active_subscriptions: state.registry.active_count(),
            queue_depth: queue.len(),
            dropped_messages: queue.dropped_total(),
            reconnect_attempt: state.reconnect_attempt,
            last_heartbeat_at,
            last_heartbeat_age_ms: last_heartbeat_at
                .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64),
        }
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamClient")
            .field("state", &state.connection)
            .field("endpoint", &state.url)
            .field("subscriptions", &state.registry.len())
            .finish()
    }
}
