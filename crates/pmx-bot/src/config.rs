//! Application configuration.
//!
//! One TOML file with nested sections mirroring the crates it configures.
//! The strategy section deserializes straight into the versioned
//! `StrategyConfig` bundle; the rest are thin wiring knobs with defaults.

use crate::error::{AppError, AppResult};
use pmx_core::{ConfigVersion, MarketId, StrategyConfig};
use pmx_engine::MonitorConfig;
use pmx_feed::FeedConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Simulated feed and instant-fill gateway, no broker.
    #[default]
    Paper,
    /// Live trading against a real broker adapter.
    Live,
}

/// Feed supervisor knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_replay_cap")]
    pub replay_cap: usize,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_replay_cap() -> usize {
    100
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            replay_cap: default_replay_cap(),
        }
    }
}

impl FeedSection {
    pub fn to_feed_config(&self, markets: Vec<MarketId>) -> FeedConfig {
        FeedConfig {
            markets,
            connect_timeout_secs: self.connect_timeout_secs,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            poll_interval_ms: self.poll_interval_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
            replay_cap: self.replay_cap,
        }
    }
}

/// Monitor loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Evaluation cadence for markets in the Active regime (seconds).
    #[serde(default = "default_base_eval_interval_secs")]
    pub base_eval_interval_secs: u64,
}

fn default_base_eval_interval_secs() -> u64 {
    15
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            base_eval_interval_secs: default_base_eval_interval_secs(),
        }
    }
}

impl MonitorSection {
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            base_eval_interval_secs: self.base_eval_interval_secs,
        }
    }
}

/// Paper-trading simulator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSection {
    /// Tick cadence of the simulated feed (ms).
    #[serde(default = "default_sim_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Starting yes-side mid price. Decimal string, e.g. "0.50".
    #[serde(default = "default_sim_start_mid")]
    pub start_mid: Decimal,
    /// Mid-price step per tick. The walk zigzags between 0.10 and 0.90.
    #[serde(default = "default_sim_step")]
    pub step: Decimal,
    /// Fixed half-spread around the mid.
    #[serde(default = "default_sim_half_spread")]
    pub half_spread: Decimal,
    /// Contracts for the one demo position opened per market at startup.
    #[serde(default = "default_sim_entry_qty")]
    pub entry_qty: Decimal,
}

fn default_sim_tick_interval_ms() -> u64 {
    500
}

fn default_sim_start_mid() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_sim_step() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

fn default_sim_half_spread() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_sim_entry_qty() -> Decimal {
    Decimal::from(10)
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_sim_tick_interval_ms(),
            start_mid: default_sim_start_mid(),
            step: default_sim_step(),
            half_spread: default_sim_half_spread(),
            entry_qty: default_sim_entry_qty(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Markets to monitor.
    #[serde(default)]
    pub markets: Vec<String>,
    /// Paper balance the entry ledger starts with.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    /// The versioned strategy/risk bundle published as version 1 at startup.
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub sim: SimSection,
}

fn default_starting_balance() -> Decimal {
    Decimal::from(10_000)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            markets: Vec::new(),
            starting_balance: default_starting_balance(),
            feed: FeedSection::default(),
            monitor: MonitorSection::default(),
            strategy: StrategyConfig::default(),
            sim: SimSection::default(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path (CLI arg, then `PMX_CONFIG`, then the
    /// default location) and load it. A missing default file falls back to
    /// built-in defaults; an explicitly named file must exist.
    pub fn load(cli_path: Option<&str>) -> AppResult<Self> {
        let explicit = cli_path
            .map(str::to_string)
            .or_else(|| std::env::var("PMX_CONFIG").ok());
        let path = explicit
            .clone()
            .unwrap_or_else(|| "config/default.toml".to_string());

        if explicit.is_none() && !Path::new(&path).exists() {
            tracing::warn!(path = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Load from a specific file, with `PMX_`-prefixed environment
    /// variables layered on top (`PMX_MONITOR__BASE_EVAL_INTERVAL_SECS`).
    pub fn from_file(path: &str) -> AppResult<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PMX").separator("__"))
            .build()
            .map_err(|e| AppError::Config(format!("failed to read config: {e}")))?
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("failed to parse config: {e}")))
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        self.markets.iter().map(|m| MarketId::from(m.as_str())).collect()
    }

    /// The strategy bundle to publish at startup. An unversioned bundle
    /// becomes version 1; published versions are never zero.
    pub fn strategy_bundle(&self) -> StrategyConfig {
        let mut strategy = self.strategy.clone();
        if strategy.version == ConfigVersion::default() {
            strategy.version = ConfigVersion::new(1);
        }
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, RunMode::Paper);
        assert!(config.markets.is_empty());
        assert_eq!(config.starting_balance, dec!(10000));
        assert_eq!(config.feed.max_reconnect_attempts, 5);
        assert_eq!(config.monitor.base_eval_interval_secs, 15);
    }

    #[test]
    fn test_unversioned_strategy_becomes_v1() {
        let config = AppConfig::default();
        assert_eq!(config.strategy_bundle().version, ConfigVersion::new(1));
    }

    #[test]
    fn test_parse_nested_sections() {
        let parsed: AppConfig = toml::from_str(
            r#"
            mode = "paper"
            markets = ["NFL-KC-YES", "NFL-BUF-YES"]
            starting_balance = "2500"

            [feed]
            max_reconnect_attempts = 3

            [monitor]
            base_eval_interval_secs = 10

            [strategy.exit]
            stop_loss_pct = "25"
            profit_target_pct = "40"
            early_profit_pct = "15"
            trailing_activation_pct = "10"
            trailing_distance = "0.05"
            expiration_window_secs = 300
            staleness_window_ms = 5000
            min_tick_volume = "1"
            confidence_floor = "0.40"
            adverse_spread = "0.15"
            rebalance_notional_cap = "5000"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.markets.len(), 2);
        assert_eq!(parsed.starting_balance, dec!(2500));
        assert_eq!(parsed.feed.max_reconnect_attempts, 3);
        assert_eq!(parsed.feed.replay_cap, 100); // untouched default
        assert_eq!(parsed.monitor.base_eval_interval_secs, 10);
        assert_eq!(parsed.strategy.exit.stop_loss_pct, dec!(25));
        // Untouched sections keep their defaults.
        assert_eq!(parsed.strategy.breakers.max_hourly_trades, 30);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = AppConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.starting_balance, config.starting_balance);
        assert_eq!(parsed.sim.tick_interval_ms, config.sim.tick_interval_ms);
    }
}
