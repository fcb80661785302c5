//! Application configuration.

use crate::error::{AppError, AppResult};
use dlob_core::{MarketType, NetworkEnv};
use dlob_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// One market to stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Market name as the server knows it, e.g. `SOL-PERP`.
    pub name: String,
    #[serde(default = "default_market_type")]
    pub market_type: MarketType,
    /// Subscribe the orderbook channel. Default: true.
    #[serde(default = "default_true")]
    pub orderbook: bool,
    /// Subscribe the trades channel. Default: false.
    #[serde(default)]
    pub trades: bool,
}

fn default_market_type() -> MarketType {
    MarketType::Perp
}

fn default_true() -> bool {
    true
}

impl MarketConfig {
    /// Parse a CLI market argument: `SOL-PERP`, `perp:SOL-PERP` or `spot:SOL`.
    ///
    /// Without a prefix the type is perp for `-PERP` names, spot otherwise.
    /// CLI markets stream both channels.
    pub fn parse(arg: &str) -> AppResult<Self> {
        let (market_type, name) = match arg.split_once(':') {
            Some((market_type, name)) => (market_type.parse::<MarketType>()?, name),
            None if arg.to_ascii_uppercase().ends_with("-PERP") => (MarketType::Perp, arg),
            None => (MarketType::Spot, arg),
        };

        if name.is_empty() {
            return Err(AppError::Config(format!("Empty market name in '{arg}'")));
        }

        Ok(Self {
            name: name.to_string(),
            market_type,
            orderbook: true,
            trades: true,
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Stream connection settings.
    #[serde(default)]
    pub stream: ConnectionConfig,
    #[serde(default = "default_markets")]
    pub markets: Vec<MarketConfig>,
    /// Interval for the periodic stats log line (seconds). 0 disables it.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_markets() -> Vec<MarketConfig> {
    vec![MarketConfig {
        name: "SOL-PERP".to_string(),
        market_type: MarketType::Perp,
        orderbook: true,
        trades: false,
    }]
}

fn default_stats_interval_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream: ConnectionConfig::default(),
            markets: default_markets(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from `path`, falling back to defaults if the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            warn!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply CLI overrides. Markets given on the command line replace the
    /// configured list.
    pub fn apply_overrides(
        &mut self,
        network: Option<NetworkEnv>,
        markets: &[String],
    ) -> AppResult<()> {
        if let Some(network) = network {
            self.stream.network = network;
        }
        if !markets.is_empty() {
            self.markets = markets
                .iter()
                .map(|arg| MarketConfig::parse(arg))
                .collect::<AppResult<Vec<_>>>()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.stream.reconnect_base_delay_ms > self.stream.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "reconnect_base_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        if self.stream.heartbeat_timeout_ms < self.stream.heartbeat_check_interval_ms {
            return Err(AppError::Config(
                "heartbeat_timeout_ms is shorter than heartbeat_check_interval_ms".to_string(),
            ));
        }
        if let Some(market) = self.markets.iter().find(|m| !m.orderbook && !m.trades) {
            return Err(AppError::Config(format!(
                "Market {} has no channel enabled",
                market.name
            )));
        }
        Ok(())
    }
}
