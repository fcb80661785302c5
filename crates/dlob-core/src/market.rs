//! Subscription identity types.
//!
//! A logical subscription is identified by channel, market type and market
//! name. The server's channel tags (e.g. `orderbook_perp_SOL-PERP`) carry the
//! same information, which is decoded here.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical stream category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Orderbook,
    Trades,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orderbook => "orderbook",
            Self::Trades => "trades",
        }
    }

    /// Classify a server channel tag by prefix.
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.starts_with(Self::Orderbook.as_str()) {
            Some(Self::Orderbook)
        } else if tag.starts_with(Self::Trades.as_str()) {
            Some(Self::Trades)
        } else {
            None
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orderbook" => Ok(Self::Orderbook),
            "trades" => Ok(Self::Trades),
            other => Err(CoreError::UnknownChannel(other.to_string())),
        }
    }
}

/// Market type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Perp,
    Spot,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perp => "perp",
            Self::Spot => "spot",
        }
    }

    /// Infer the market type from a channel tag by substring.
    pub fn infer_from_tag(tag: &str) -> Option<Self> {
        if tag.contains("perp") {
            Some(Self::Perp)
        } else if tag.contains("spot") {
            Some(Self::Spot)
        } else {
            None
        }
    }

    /// Market name embedded after the `_perp_` / `_spot_` marker, if any.
    pub fn market_name_in_tag(tag: &str) -> Option<&str> {
        [Self::Perp, Self::Spot].iter().find_map(|mt| {
            let marker = format!("_{}_", mt.as_str());
            tag.find(&marker)
                .map(|pos| &tag[pos + marker.len()..])
                .filter(|name| !name.is_empty())
        })
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "perp" => Ok(Self::Perp),
            "spot" => Ok(Self::Spot),
            other => Err(CoreError::UnknownMarketType(other.to_string())),
        }
    }
}

/// Composite identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub market_type: MarketType,
    pub market: String,
}

impl SubscriptionKey {
    pub fn new(channel: Channel, market_type: MarketType, market: impl Into<String>) -> Self {
        Self {
            channel,
            market_type,
            market: market.into(),
        }
    }

    pub fn orderbook(market_type: MarketType, market: impl Into<String>) -> Self {
        Self::new(Channel::Orderbook, market_type, market)
    }

    pub fn trades(market_type: MarketType, market: impl Into<String>) -> Self {
        Self::new(Channel::Trades, market_type, market)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.channel, self.market_type, self.market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_from_tag() {
        assert_eq!(Channel::from_tag("orderbook"), Some(Channel::Orderbook));
        assert_eq!(
            Channel::from_tag("orderbook_perp_SOL-PERP"),
            Some(Channel::Orderbook)
        );
        assert_eq!(Channel::from_tag("trades_spot_1"), Some(Channel::Trades));
        assert_eq!(Channel::from_tag("heartbeat"), None);
        assert_eq!(Channel::from_tag("xorderbook"), None);
    }

    #[test]
    fn test_market_type_inference() {
        assert_eq!(
            MarketType::infer_from_tag("orderbook_perp_0"),
            Some(MarketType::Perp)
        );
        assert_eq!(
            MarketType::infer_from_tag("trades_spot_1"),
            Some(MarketType::Spot)
        );
        assert_eq!(MarketType::infer_from_tag("orderbook"), None);
    }

    #[test]
    fn test_market_name_in_tag() {
        assert_eq!(
            MarketType::market_name_in_tag("orderbook_perp_SOL-PERP"),
            Some("SOL-PERP")
        );
        assert_eq!(MarketType::market_name_in_tag("trades_spot_1"), Some("1"));
        assert_eq!(MarketType::market_name_in_tag("orderbook_perp_"), None);
        assert_eq!(MarketType::market_name_in_tag("orderbook"), None);
    }

    #[test]
    fn test_key_display() {
        let key = SubscriptionKey::orderbook(MarketType::Perp, "SOL-PERP");
        assert_eq!(key.to_string(), "orderbook:perp:SOL-PERP");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("perp".parse::<MarketType>().unwrap(), MarketType::Perp);
        assert_eq!("SPOT".parse::<MarketType>().unwrap(), MarketType::Spot);
        assert!("futures".parse::<MarketType>().is_err());
        assert!("candles".parse::<Channel>().is_err());
    }
}
