//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.
//!
//! The display-layer-adjustable subset lives in [`RuntimeSettings`], shared
//! behind an `Arc<RwLock<_>>`. Changes take effect on the next scan cycle,
//! never retroactively on an in-flight trade.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Chain, TokenPair};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub trading: TradingConfig,
    pub chains: Vec<ChainConfig>,
    pub pairs: Vec<String>,
    pub bridge: BridgeConfig,
    pub advisory: AdvisoryConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub scan_interval_secs: u64,
    /// Per-quote timeout inside a scan cycle; a slow venue is excluded
    /// from the cycle, never allowed to stall it.
    pub quote_timeout_ms: u64,
    /// Path for the trade-history snapshot written on shutdown.
    #[serde(default)]
    pub history_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    pub min_profit_pct: f64,
    pub max_capital_per_trade_usd: f64,
    pub capital_per_trade_usd: f64,
    pub max_slippage_pct: f64,
    pub max_concurrent_executions: usize,
    pub advisory_accept_threshold: f64,
    /// Score substituted when the advisory service is unavailable.
    pub advisory_neutral_score: f64,
    /// Price bucket width (quote currency) for fingerprint derivation.
    pub price_bucket_width: f64,
    pub auto_execute: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain: String,
    pub enabled: bool,
    pub venues: Vec<VenueConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub name: String,
    /// "http" for a real quote endpoint, "simulated" for the in-process
    /// venue used in keyless/dry-run operation.
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Reference base-token price for the simulated mode.
    #[serde(default)]
    pub sim_price: Option<f64>,
    /// Gas estimate per trade on this venue, USD.
    pub gas_estimate_usd: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub fee_pct: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdvisoryConfig {
    /// "openai" or "static" (fixed-score, keyless operation).
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Score returned by the static advisor in keyless operation.
    #[serde(default = "default_static_score")]
    pub static_score: f64,
}

fn default_static_score() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trading.capital_per_trade_usd <= 0.0 {
            anyhow::bail!("capital_per_trade_usd must be positive");
        }
        if self.trading.max_concurrent_executions == 0 {
            anyhow::bail!("max_concurrent_executions must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.trading.advisory_accept_threshold) {
            anyhow::bail!("advisory_accept_threshold must be in [0, 1]");
        }
        for raw in &self.pairs {
            raw.parse::<TokenPair>()
                .with_context(|| format!("Invalid token pair in config: {raw}"))?;
        }
        for chain_cfg in &self.chains {
            chain_cfg
                .chain
                .parse::<Chain>()
                .with_context(|| format!("Invalid chain in config: {}", chain_cfg.chain))?;
        }
        Ok(())
    }

    /// Enabled chains, parsed.
    pub fn enabled_chains(&self) -> Vec<(Chain, &ChainConfig)> {
        self.chains
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|c| c.chain.parse::<Chain>().ok().map(|chain| (chain, c)))
            .collect()
    }

    /// Configured token pairs, parsed.
    pub fn token_pairs(&self) -> Vec<TokenPair> {
        self.pairs
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect()
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The initial runtime-adjustable settings derived from this config.
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            enabled_chains: self.enabled_chains().iter().map(|(c, _)| *c).collect(),
            min_profit_pct: crate::types::d(self.trading.min_profit_pct),
            max_capital_per_trade_usd: crate::types::d(self.trading.max_capital_per_trade_usd),
            capital_per_trade_usd: crate::types::d(self.trading.capital_per_trade_usd),
            max_slippage_pct: crate::types::d(self.trading.max_slippage_pct),
            max_concurrent_executions: self.trading.max_concurrent_executions,
            advisory_accept_threshold: self.trading.advisory_accept_threshold,
            advisory_neutral_score: self.trading.advisory_neutral_score,
            price_bucket_width: crate::types::d(self.trading.price_bucket_width),
            bridge_fee_pct: crate::types::d(self.bridge.fee_pct),
            auto_execute: self.trading.auto_execute,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime settings
// ---------------------------------------------------------------------------

/// The configuration subset the display layer may adjust at runtime.
///
/// A snapshot is taken once per scan cycle; the admission gate reads
/// `max_concurrent_executions` at admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Chains the scanner may quote this cycle. Venues on a chain removed
    /// here go quiet on the next cycle; in-flight trades are unaffected.
    pub enabled_chains: HashSet<Chain>,
    pub min_profit_pct: Decimal,
    pub max_capital_per_trade_usd: Decimal,
    pub capital_per_trade_usd: Decimal,
    pub max_slippage_pct: Decimal,
    pub max_concurrent_executions: usize,
    pub advisory_accept_threshold: f64,
    pub advisory_neutral_score: f64,
    pub price_bucket_width: Decimal,
    pub bridge_fee_pct: Decimal,
    pub auto_execute: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            enabled_chains: Chain::ALL.iter().copied().collect(),
            min_profit_pct: dec!(1.0),
            max_capital_per_trade_usd: dec!(10000),
            capital_per_trade_usd: dec!(1000),
            max_slippage_pct: dec!(0.5),
            max_concurrent_executions: 3,
            advisory_accept_threshold: 0.7,
            advisory_neutral_score: 0.5,
            price_bucket_width: dec!(0.5),
            bridge_fee_pct: dec!(0.5),
            auto_execute: true,
        }
    }
}

/// Shared handle to the runtime settings.
pub type SharedSettings = Arc<RwLock<RuntimeSettings>>;

pub fn shared(settings: RuntimeSettings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
