//! WebSocket message types.
//!
//! Outbound frames are subscribe/unsubscribe intents. Inbound frames are
//! `{channel, data, ts}` envelopes; `parse_frame` validates them into a typed
//! `InboundFrame` at the boundary so dispatch never pokes at raw JSON.

use crate::error::{WsError, WsResult};
use dlob_core::{Channel, MarketType, SubscriptionKey, WireDecimal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel tag of the server liveness signal.
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Subscribe,
    Unsubscribe,
}

/// Subscribe/unsubscribe intent.
///
/// Serialized as `{"type", "marketType", "channel", "market"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub market_type: MarketType,
    pub channel: Channel,
    pub market: String,
}

impl SubscriptionRequest {
    pub fn subscribe(key: &SubscriptionKey) -> Self {
        Self::new(RequestType::Subscribe, key)
    }

    pub fn unsubscribe(key: &SubscriptionKey) -> Self {
        Self::new(RequestType::Unsubscribe, key)
    }

    fn new(request_type: RequestType, key: &SubscriptionKey) -> Self {
        Self {
            request_type,
            market_type: key.market_type,
            channel: key.channel,
            market: key.market.clone(),
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Outer JSON wrapper sent by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub ts: Option<WireDecimal>,
}

/// One orderbook level as sent by the server (integer-scaled).
#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel {
    pub price: WireDecimal,
    #[serde(default)]
    pub size: Option<WireDecimal>,
}

/// Orderbook payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookPayload {
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    #[serde(default, alias = "oraclePrice")]
    pub oracle: Option<WireDecimal>,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub market_type: Option<Value>,
    #[serde(default)]
    pub market_index: Option<WireDecimal>,
    #[serde(default)]
    pub slot: Option<WireDecimal>,
    #[serde(default)]
    pub ts: Option<WireDecimal>,
}

impl OrderbookPayload {
    pub fn market_type(&self) -> Option<MarketType> {
        self.market_type.as_ref().and_then(market_type_from_value)
    }

    pub fn market_name(&self) -> Option<&str> {
        self.market_name
            .as_deref()
            .or(self.market.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// A single fill as sent on the trades channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    #[serde(default)]
    pub ts: Option<WireDecimal>,
    #[serde(default)]
    pub market_index: Option<WireDecimal>,
    #[serde(default)]
    pub market_type: Option<Value>,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub filler: Option<String>,
    #[serde(default)]
    pub taker: Option<String>,
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default)]
    pub taker_fee: Option<WireDecimal>,
    #[serde(default)]
    pub maker_fee: Option<WireDecimal>,
    #[serde(default)]
    pub base_asset_amount_filled: Option<WireDecimal>,
    #[serde(default)]
    pub quote_asset_amount_filled: Option<WireDecimal>,
    #[serde(default)]
    pub oracle_price: Option<WireDecimal>,
    #[serde(default)]
    pub slot: Option<WireDecimal>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub taker_order_direction: Option<Value>,
}

/// Trades payload: the server sends either one fill or a batch.
#[derive(Debug, Clone)]
pub struct TradesPayload {
    pub fills: Vec<RawTrade>,
}

impl TradesPayload {
    pub fn market_type(&self) -> Option<MarketType> {
        self.fills
            .iter()
            .find_map(|f| f.market_type.as_ref().and_then(market_type_from_value))
    }

    pub fn market_name(&self) -> Option<&str> {
        self.fills.iter().find_map(|f| {
            f.market_name
                .as_deref()
                .or(f.market.as_deref())
                .filter(|name| !name.is_empty())
        })
    }

    pub fn slot(&self) -> Option<u64> {
        self.fills
            .iter()
            .filter_map(|f| f.slot.and_then(|s| s.to_u64()))
            .max()
    }

    pub fn ts(&self) -> Option<i64> {
        self.fills
            .iter()
            .filter_map(|f| f.ts.and_then(|t| t.to_i64()))
            .max()
    }
}

impl<'de> Deserialize<'de> for TradesPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Many(Vec<RawTrade>),
            One(Box<RawTrade>),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Many(fills) => Self { fills },
            Wire::One(fill) => Self { fills: vec![*fill] },
        })
    }
}

/// A validated inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Liveness signal.
    Heartbeat { ts: Option<i64> },
    /// Orderbook update on the given server channel tag.
    Orderbook {
        tag: String,
        payload: Box<OrderbookPayload>,
        ts: Option<i64>,
    },
    /// Trade fills on the given server channel tag.
    Trades {
        tag: String,
        payload: TradesPayload,
        ts: Option<i64>,
    },
    /// Envelope with a channel this client does not handle.
    Unrecognized { tag: Option<String> },
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::Orderbook { .. } => "orderbook",
            Self::Trades { .. } => "trades",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Parse a text frame into a typed `InboundFrame`.
///
/// Malformed envelopes and payloads are errors; the caller drops the frame.
pub fn parse_frame(text: &str) -> WsResult<InboundFrame> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| WsError::ParseError(format!("envelope: {e}")))?;
    let ts = envelope.ts.and_then(|t| t.to_i64());

    let Some(tag) = envelope.channel else {
        return Ok(InboundFrame::Unrecognized { tag: None });
    };

    if tag == HEARTBEAT_CHANNEL {
        return Ok(InboundFrame::Heartbeat { ts });
    }

    match Channel::from_tag(&tag) {
        Some(Channel::Orderbook) => {
            let payload = decode_data(&tag, envelope.data)?;
            Ok(InboundFrame::Orderbook {
                tag,
                payload: Box::new(payload),
                ts,
            })
        }
        Some(Channel::Trades) => {
            let payload = decode_data(&tag, envelope.data)?;
            Ok(InboundFrame::Trades { tag, payload, ts })
        }
        None => Ok(InboundFrame::Unrecognized { tag: Some(tag) }),
    }
}

/// Decode `data`, which may be a JSON-encoded string or an inline value.
fn decode_data<T: serde::de::DeserializeOwned>(tag: &str, data: Option<Value>) -> WsResult<T> {
    match data {
        Some(Value::String(s)) => Ok(serde_json::from_str(&s)?),
        Some(value @ (Value::Object(_) | Value::Array(_))) => Ok(serde_json::from_value(value)?),
        Some(other) => Err(WsError::UnsupportedPayload(format!(
            "{tag}: data is {}",
            json_kind(&other)
        ))),
        None => Err(WsError::UnsupportedPayload(format!("{tag}: missing data"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Market type may be `"perp"` or an enum-style object `{"perp": {}}`.
pub(crate) fn market_type_from_value(value: &Value) -> Option<MarketType> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Object(map) => map.keys().find_map(|k| k.parse().ok()),
        _ => None,
    }
}

/// Direction may be `"long"` or an enum-style object `{"long": {}}`.
pub(crate) fn direction_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.keys().next().cloned(),
        _ => None,
    }
}
