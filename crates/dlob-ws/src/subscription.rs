//! Subscription registry.
//!
//! One record per `SubscriptionKey`; any number of handlers may share a
//! record. A record exists only while it has at least one handler.
//!
//! The `active` flag means a subscribe intent was sent for the key on the
//! current socket. It is cleared whenever the socket leaves `Connected`.

use crate::events::{OrderbookHandler, TradeHandler};
use dlob_core::{Channel, MarketType, SubscriptionKey};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of a registered handler.
pub type HandlerId = u64;

/// A data handler; the variant matches the key's channel.
#[derive(Clone)]
pub enum Handler {
    Orderbook(OrderbookHandler),
    Trades(TradeHandler),
}

impl Handler {
    /// Same underlying callback (pointer identity).
    fn same_as(&self, other: &Handler) -> bool {
        match (self, other) {
            (Self::Orderbook(a), Self::Orderbook(b)) => Arc::ptr_eq(a, b),
            (Self::Trades(a), Self::Trades(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orderbook(_) => f.write_str("Handler::Orderbook"),
            Self::Trades(_) => f.write_str("Handler::Trades"),
        }
    }
}

/// State of one logical subscription.
#[derive(Debug)]
pub struct SubscriptionRecord {
    pub key: SubscriptionKey,
    handlers: Vec<(HandlerId, Handler)>,
    pub active: bool,
    pub last_slot: Option<u64>,
    pub last_ts: Option<i64>,
    /// Literal channel tag the server last used for this record.
    pub server_channel: Option<String>,
}

impl SubscriptionRecord {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            handlers: Vec::new(),
            active: false,
            last_slot: None,
            last_ts: None,
            server_channel: None,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Result of registering a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub handler_id: HandlerId,
    /// The key had no record before this call.
    pub new_record: bool,
    /// The identical handler was already registered under this key.
    pub coalesced: bool,
}

/// Result of removing a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Unknown key or handler (already removed).
    NotFound,
    /// Handler removed; other handlers remain.
    HandlerRemoved,
    /// Last handler removed and the record deleted.
    RecordRemoved { was_active: bool },
}

/// All subscriptions of one client.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    records: BTreeMap<SubscriptionKey, SubscriptionRecord>,
    next_handler_id: HandlerId,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler under `key`, creating the record if needed.
    pub fn register(&mut self, key: SubscriptionKey, handler: Handler) -> Registration {
        let new_record = !self.records.contains_key(&key);
        let record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| SubscriptionRecord::new(key));

        if let Some((id, _)) = record.handlers.iter().find(|(_, h)| h.same_as(&handler)) {
            return Registration {
                handler_id: *id,
                new_record,
                coalesced: true,
            };
        }

        self.next_handler_id += 1;
        let handler_id = self.next_handler_id;
        record.handlers.push((handler_id, handler));
        Registration {
            handler_id,
            new_record,
            coalesced: false,
        }
    }

    /// Remove one handler; deletes the record when it was the last one.
    pub fn unregister(&mut self, key: &SubscriptionKey, handler_id: HandlerId) -> Removal {
        let Some(record) = self.records.get_mut(key) else {
            return Removal::NotFound;
        };

        let before = record.handlers.len();
        record.handlers.retain(|(id, _)| *id != handler_id);
        if record.handlers.len() == before {
            return Removal::NotFound;
        }

        if record.handlers.is_empty() {
            let was_active = record.active;
            self.records.remove(key);
            Removal::RecordRemoved { was_active }
        } else {
            Removal::HandlerRemoved
        }
    }

    pub fn mark_active(&mut self, key: &SubscriptionKey) {
        if let Some(record) = self.records.get_mut(key) {
            record.active = true;
        }
    }

    /// Clear every `active` flag (socket left `Connected`).
    pub fn deactivate_all(&mut self) {
        for record in self.records.values_mut() {
            record.active = false;
        }
    }

    /// Keys to re-subscribe on a fresh connection, marking them active.
    ///
    /// Only records with at least one handler are returned.
    pub fn activate_all(&mut self) -> Vec<SubscriptionKey> {
        self.records
            .values_mut()
            .filter(|r| !r.handlers.is_empty())
            .map(|r| {
                r.active = true;
                r.key.clone()
            })
            .collect()
    }

    /// Find the record an inbound frame belongs to.
    ///
    /// Exact key match by market name first; otherwise any record of the same
    /// channel and market type whose remembered server channel tag equals
    /// `tag`.
    pub fn resolve(
        &self,
        channel: Channel,
        market_type: MarketType,
        market_name: Option<&str>,
        tag: &str,
    ) -> Option<SubscriptionKey> {
        if let Some(name) = market_name {
            let key = SubscriptionKey::new(channel, market_type, name);
            if self.records.contains_key(&key) {
                return Some(key);
            }
        }

        self.records
            .values()
            .find(|r| {
                r.key.channel == channel
                    && r.key.market_type == market_type
                    && r.server_channel.as_deref() == Some(tag)
            })
            .map(|r| r.key.clone())
    }

    /// Update delivery metadata and return the handlers to invoke.
    pub fn record_delivery(
        &mut self,
        key: &SubscriptionKey,
        tag: &str,
        slot: Option<u64>,
        ts: Option<i64>,
    ) -> Vec<Handler> {
        let Some(record) = self.records.get_mut(key) else {
            return Vec::new();
        };

        if slot.is_some() {
            record.last_slot = slot;
        }
        if ts.is_some() {
            record.last_ts = ts;
        }
        if record.server_channel.as_deref() != Some(tag) {
            record.server_channel = Some(tag.to_string());
        }

        record.handlers.iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.active).count()
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.records.keys().cloned().collect()
    }
}
