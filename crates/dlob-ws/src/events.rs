//! Typed events and per-channel listener lists.
//!
//! Each process-wide event kind (connection, heartbeat, backpressure) has its
//! own `Listeners<E>`; data events go to the handlers of the matching
//! subscription. Every callback runs isolated: a panicking handler is logged
//! and the remaining handlers still run.

use crate::connection::ConnectionState;
use crate::error::WsResult;
use crate::message::{
    direction_from_value, market_type_from_value, OrderbookPayload, RawLevel, TradesPayload,
};
use chrono::{DateTime, Utc};
use dlob_core::{
    mark_price, BookLevel, Price, Size, SubscriptionKey, TradeFill, WireDecimal, BASE_PRECISION,
    PRICE_PRECISION, QUOTE_PRECISION,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Connection lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub state: ConnectionState,
    pub url: String,
    /// Reconnect attempt of the current cycle (0 once connected).
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Heartbeat envelope received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEvent {
    pub received_at: DateTime<Utc>,
    /// Milliseconds since the previous heartbeat on this connection.
    pub delta_ms: Option<u64>,
    pub server_ts: Option<i64>,
}

/// Queue overflow notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureEvent {
    pub queue_depth: usize,
    /// Cumulative over the client's lifetime.
    pub dropped_messages: u64,
}

/// Orderbook update for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderbookEvent {
    pub key: SubscriptionKey,
    /// Literal channel tag the server used.
    pub channel_tag: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub bid_price: Option<Price>,
    pub ask_price: Option<Price>,
    pub oracle_price: Option<Price>,
    pub mark_price: Option<Price>,
    pub slot: Option<u64>,
    pub ts: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// Trade fills for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    pub key: SubscriptionKey,
    pub channel_tag: String,
    pub fills: Vec<TradeFill>,
    pub slot: Option<u64>,
    pub ts: Option<i64>,
    pub received_at: DateTime<Utc>,
}

pub type OrderbookHandler = Arc<dyn Fn(&OrderbookEvent) + Send + Sync>;
pub type TradeHandler = Arc<dyn Fn(&TradeEvent) + Send + Sync>;

/// Scales of integer wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    #[serde(default = "default_price_precision")]
    pub price: u64,
    #[serde(default = "default_base_precision")]
    pub base: u64,
    #[serde(default = "default_quote_precision")]
    pub quote: u64,
}

fn default_price_precision() -> u64 {
    PRICE_PRECISION
}

fn default_base_precision() -> u64 {
    BASE_PRECISION
}

fn default_quote_precision() -> u64 {
    QUOTE_PRECISION
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            price: default_price_precision(),
            base: default_base_precision(),
            quote: default_quote_precision(),
        }
    }
}

impl Precision {
    fn price(&self, raw: WireDecimal) -> WsResult<Price> {
        Ok(Price::from_scaled(raw.inner(), self.price)?)
    }

    fn base(&self, raw: WireDecimal) -> WsResult<Size> {
        Ok(Size::from_scaled(raw.inner(), self.base)?)
    }

    fn quote(&self, raw: WireDecimal) -> Option<Decimal> {
        raw.inner().checked_div(Decimal::from(self.quote))
    }

    fn level(&self, raw: &RawLevel) -> WsResult<BookLevel> {
        let size = match raw.size {
            Some(size) => self.base(size)?,
            None => Size::ZERO,
        };
        Ok(BookLevel::new(self.price(raw.price)?, size))
    }
}

impl OrderbookEvent {
    /// Build an event from a wire payload.
    ///
    /// Levels are taken in server order; the first bid and first ask are
    /// the top of book.
    pub fn from_payload(
        key: SubscriptionKey,
        channel_tag: String,
        payload: &OrderbookPayload,
        envelope_ts: Option<i64>,
        precision: &Precision,
    ) -> WsResult<Self> {
        let bids = payload
            .bids
            .iter()
            .map(|l| precision.level(l))
            .collect::<WsResult<Vec<_>>>()?;
        let asks = payload
            .asks
            .iter()
            .map(|l| precision.level(l))
            .collect::<WsResult<Vec<_>>>()?;
        let oracle_price = payload.oracle.map(|o| precision.price(o)).transpose()?;

        let bid_price = bids.first().map(|l| l.price);
        let ask_price = asks.first().map(|l| l.price);

        Ok(Self {
            key,
            channel_tag,
            bid_price,
            ask_price,
            oracle_price,
            mark_price: mark_price(bid_price, ask_price, oracle_price),
            bids,
            asks,
            slot: payload.slot.and_then(|s| s.to_u64()),
            ts: payload.ts.and_then(|t| t.to_i64()).or(envelope_ts),
            received_at: Utc::now(),
        })
    }
}

impl TradeEvent {
    pub fn from_payload(
        key: SubscriptionKey,
        channel_tag: String,
        payload: &TradesPayload,
        envelope_ts: Option<i64>,
        precision: &Precision,
    ) -> WsResult<Self> {
        let fills = payload
            .fills
            .iter()
            .map(|raw| -> WsResult<TradeFill> {
                Ok(TradeFill {
                    ts: raw.ts.and_then(|t| t.to_i64()),
                    market_index: raw
                        .market_index
                        .and_then(|i| i.to_u64())
                        .and_then(|i| u16::try_from(i).ok()),
                    market_type: raw
                        .market_type
                        .as_ref()
                        .and_then(market_type_from_value)
                        .or(Some(key.market_type)),
                    filler: raw.filler.clone(),
                    taker: raw.taker.clone(),
                    maker: raw.maker.clone(),
                    taker_fee: raw.taker_fee.and_then(|f| precision.quote(f)),
                    maker_fee: raw.maker_fee.and_then(|f| precision.quote(f)),
                    base_asset_amount_filled: raw
                        .base_asset_amount_filled
                        .map(|b| precision.base(b))
                        .transpose()?,
                    quote_asset_amount_filled: raw
                        .quote_asset_amount_filled
                        .and_then(|q| precision.quote(q)),
                    oracle_price: raw.oracle_price.map(|p| precision.price(p)).transpose()?,
                    slot: raw.slot.and_then(|s| s.to_u64()),
                    action: raw.action.clone(),
                    taker_order_direction: raw
                        .taker_order_direction
                        .as_ref()
                        .and_then(direction_from_value),
                })
            })
            .collect::<WsResult<Vec<_>>>()?;

        Ok(Self {
            key,
            channel_tag,
            slot: payload.slot(),
            ts: payload.ts().or(envelope_ts),
            fills,
            received_at: Utc::now(),
        })
    }
}

/// Run a callback, logging instead of propagating a panic.
pub(crate) fn invoke_isolated(kind: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic".to_string());
        error!(kind, %message, "Event handler panicked");
    }
}

/// Identifier of a registered listener.
pub type ListenerId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Observer list for one event kind.
pub struct Listeners<E> {
    kind: &'static str,
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add(&self, callback: Callback<E>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, callback));
        id
    }

    /// Remove a listener; returns false if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Notify every listener. Callbacks run without the list locked, so a
    /// listener may add or remove listeners.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .entries
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            invoke_isolated(self.kind, || callback(event));
        }
    }
}

/// All process-wide listener lists of a client.
pub(crate) struct EventListeners {
    pub connection: Listeners<ConnectionEvent>,
    pub heartbeat: Listeners<HeartbeatEvent>,
    pub backpressure: Listeners<BackpressureEvent>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self {
            connection: Listeners::new("connection"),
            heartbeat: Listeners::new("heartbeat"),
            backpressure: Listeners::new("backpressure"),
        }
    }
}
