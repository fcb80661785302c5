//! Network environment selecting the stream endpoint.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Solana cluster the DLOB server indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkEnv {
    #[default]
    MainnetBeta,
    Devnet,
}

impl NetworkEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MainnetBeta => "mainnet-beta",
            Self::Devnet => "devnet",
        }
    }

    /// Public DLOB WebSocket endpoint for this environment.
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            Self::MainnetBeta => "wss://dlob.drift.trade/ws",
            Self::Devnet => "wss://master.dlob.drift.trade/ws",
        }
    }
}

impl fmt::Display for NetworkEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkEnv {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet-beta" | "mainnet" => Ok(Self::MainnetBeta),
            "devnet" => Ok(Self::Devnet),
            other => Err(CoreError::UnknownNetwork(other.to_string())),
        }
    }
}
