//! Consolidation configuration.

use std::env;

use serde::{Deserialize, Serialize};
use zcash_protocol::consensus::NetworkType;

use crate::address::SaplingAddress;
use crate::builder::{CONSOLIDATION_EXPIRY_DELTA, DEFAULT_FEE};
use crate::grouping::{MAX_NOTES_PER_TX, MIN_CONFIRMATIONS};
use crate::{ConsolidationError, Result};

/// Network the wallet runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkKind {
    pub fn network_type(self) -> NetworkType {
        match self {
            Self::Mainnet => NetworkType::Main,
            Self::Testnet => NetworkType::Test,
            Self::Regtest => NetworkType::Regtest,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(ConsolidationError::Config(format!(
                "invalid Zcash network '{other}', expected 'mainnet', 'testnet' or 'regtest'"
            ))),
        }
    }
}

/// Settings for scheduled Sapling note consolidation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Run consolidation automatically as new blocks arrive.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub network: NetworkKind,

    /// Override for the destination address (Bech32 Sapling address).
    /// Read by callers of `resolve_consolidation_destination`; runs always
    /// spend back to each group's own address.
    #[serde(default)]
    pub dest_address: Option<String>,

    /// Run every `interval` blocks.
    #[serde(default = "default_interval")]
    pub interval: u32,

    #[serde(default = "default_fee")]
    pub fee: u64,

    /// Blocks until consolidation transactions expire.
    #[serde(default = "default_expiry_delta")]
    pub expiry_delta: u32,

    #[serde(default = "default_max_notes")]
    pub max_notes_per_tx: usize,

    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
}

fn default_interval() -> u32 {
    100
}

fn default_fee() -> u64 {
    DEFAULT_FEE
}

fn default_expiry_delta() -> u32 {
    CONSOLIDATION_EXPIRY_DELTA
}

fn default_max_notes() -> usize {
    MAX_NOTES_PER_TX
}

fn default_min_confirmations() -> u32 {
    MIN_CONFIRMATIONS
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            network: NetworkKind::default(),
            dest_address: None,
            interval: default_interval(),
            fee: default_fee(),
            expiry_delta: default_expiry_delta(),
            max_notes_per_tx: default_max_notes(),
            min_confirmations: default_min_confirmations(),
        }
    }
}

impl ConsolidationConfig {
    /// Load from `ZKPF_CONSOLIDATION_*` environment variables and validate.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(network) = env::var("ZKPF_CONSOLIDATION_NETWORK") {
            config.network = NetworkKind::parse(&network)?;
        }

        config.enabled = env::var("ZKPF_CONSOLIDATION_ENABLED")
            .ok()
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        config.dest_address = env::var("ZKPF_CONSOLIDATION_DEST_ADDRESS")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Ok(interval) = env::var("ZKPF_CONSOLIDATION_INTERVAL") {
            config.interval = interval.trim().parse().map_err(|_| {
                ConsolidationError::Config(format!("invalid consolidation interval '{interval}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the operation cannot run with.
    ///
    /// The destination override must decode to a Sapling address on the
    /// configured network; the resolver relies on this check having passed.
    pub fn validate(&self) -> Result<()> {
        if let Some(encoded) = &self.dest_address {
            SaplingAddress::decode(self.network.network_type(), encoded).map_err(|e| {
                ConsolidationError::Config(format!("consolidation destination: {e}"))
            })?;
        }
        if self.interval == 0 {
            return Err(ConsolidationError::Config(
                "consolidation interval must be at least 1 block".into(),
            ));
        }
        if self.max_notes_per_tx == 0 {
            return Err(ConsolidationError::Config(
                "max notes per transaction must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn network_type(&self) -> NetworkType {
        self.network.network_type()
    }
}
