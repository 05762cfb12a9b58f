//! Configuration module for the transfer engine
//!
//! This module handles configuration loading from TOML files and environment
//! variables, and provides structured configuration types. Every section has
//! defaults, so an empty file is a valid configuration.

use crate::backoff::BackoffConfig;
use crate::reconcile::ReconcileConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Overrides `solana.primary_rpc`
pub const ENV_PRIMARY_RPC: &str = "TRANSFER_ENGINE_PRIMARY_RPC";
/// Overrides `solana.fallback_rpc`
pub const ENV_FALLBACK_RPC: &str = "TRANSFER_ENGINE_FALLBACK_RPC";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{section}: RPC URL must not be empty")]
    EmptyUrl { section: &'static str },

    #[error("backoff: min_delay_ms ({min}) exceeds max_delay_ms ({max})")]
    DelayRange { min: u64, max: u64 },

    #[error("backoff: max_failure_count must be at least 1")]
    ZeroFailureCount,

    #[error("pending: gc_grace_secs must be at least 1")]
    ZeroGraceWindow,

    #[error("pending: history_limit must be at least 1")]
    ZeroHistoryLimit,

    #[error("solana: unknown commitment level '{0}'")]
    Commitment(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub solana: SolanaConfig,

    #[serde(default)]
    pub ton: TonConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub pending: PendingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolanaConfig {
    #[serde(default = "default_solana_primary")]
    pub primary_rpc: String,

    /// Public endpoint used when the primary fails with a network error
    #[serde(default = "default_solana_fallback")]
    pub fallback_rpc: String,

    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TonConfig {
    #[serde(default = "default_ton_primary")]
    pub primary_rpc: String,

    #[serde(default = "default_ton_fallback")]
    pub fallback_rpc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingConfig {
    /// Seconds between collector sweeps of resolved entries
    #[serde(default = "default_gc_grace_secs")]
    pub gc_grace_secs: u64,

    /// Seconds a `Pending` entry may wait before it is marked timed out
    #[serde(default = "default_wait_window_secs")]
    pub wait_window_secs: u64,

    /// History entries inspected per poll
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// sled directory of the CLI pending store, `pending-store` when unset
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,

    /// Default filter, `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_solana_primary() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_solana_fallback() -> String { "https://solana-rpc.publicnode.com".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_ton_primary() -> String { "https://toncenter.com/api/v2/jsonRPC".to_string() }
fn default_ton_fallback() -> String { "https://ton.access.orbs.network/jsonRPC".to_string() }
fn default_gc_grace_secs() -> u64 { 15 }
fn default_wait_window_secs() -> u64 { 60 }
fn default_history_limit() -> usize { 32 }
fn default_filter() -> String { "info,transfer_engine=debug".to_string() }

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            primary_rpc: default_solana_primary(),
            fallback_rpc: default_solana_fallback(),
            commitment: default_commitment(),
        }
    }
}

impl Default for TonConfig {
    fn default() -> Self {
        Self {
            primary_rpc: default_ton_primary(),
            fallback_rpc: default_ton_fallback(),
        }
    }
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            gc_grace_secs: default_gc_grace_secs(),
            wait_window_secs: default_wait_window_secs(),
            history_limit: default_history_limit(),
            storage_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_filter(),
        }
    }
}

impl SolanaConfig {
    pub fn commitment_config(&self) -> Result<CommitmentConfig, ConfigError> {
        CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| ConfigError::Commitment(self.commitment.clone()))
    }
}

impl PendingConfig {
    pub fn gc_grace(&self) -> Duration {
        Duration::from_secs(self.gc_grace_secs)
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            history_limit: self.history_limit,
            wait_window: Duration::from_secs(self.wait_window_secs),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content).context("invalid configuration TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_PRIMARY_RPC) {
            self.solana.primary_rpc = url;
        }
        if let Ok(url) = std::env::var(ENV_FALLBACK_RPC) {
            self.solana.fallback_rpc = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solana.primary_rpc.trim().is_empty() || self.solana.fallback_rpc.trim().is_empty() {
            return Err(ConfigError::EmptyUrl { section: "solana" });
        }
        if self.ton.primary_rpc.trim().is_empty() || self.ton.fallback_rpc.trim().is_empty() {
            return Err(ConfigError::EmptyUrl { section: "ton" });
        }
        self.solana.commitment_config()?;

        if self.backoff.min_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::DelayRange {
                min: self.backoff.min_delay_ms,
                max: self.backoff.max_delay_ms,
            });
        }
        if self.backoff.max_failure_count == 0 {
            return Err(ConfigError::ZeroFailureCount);
        }
        if self.pending.gc_grace_secs == 0 {
            return Err(ConfigError::ZeroGraceWindow);
        }
        if self.pending.history_limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }
        Ok(())
    }
}
