//! Immutable, versioned strategy/risk configuration.
//!
//! A position stores the `ConfigVersion` active when it was opened and is
//! evaluated against that exact bundle for its whole life, so replay and
//! attribution stay deterministic even after the operator rolls thresholds.

use crate::{Price, Qty};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Monotonically increasing configuration version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ConfigVersion(u32);

impl ConfigVersion {
    pub fn new(v: u32) -> Self {
        Self(v)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Entry thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryThresholds {
    /// Minimum edge (true probability minus price) to enter, as a fraction.
    pub min_edge: Decimal,
    /// Minimum calculated probability for the side being bought.
    pub min_probability: Decimal,
    /// Maximum spread tolerated at entry.
    pub max_spread: Price,
}

impl Default for EntryThresholds {
    fn default() -> Self {
        Self {
            min_edge: Decimal::new(3, 2),        // 0.03
            min_probability: Decimal::new(1, 1), // 0.10
            max_spread: Price::new(Decimal::new(5, 2)), // 0.05
        }
    }
}

/// Exit thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitThresholds {
    /// Stop-loss as a percentage of entry price (positive number).
    pub stop_loss_pct: Decimal,
    /// Profit target as a percentage of entry price.
    pub profit_target_pct: Decimal,
    /// Opportunistic early profit-take percentage (below the target).
    pub early_profit_pct: Decimal,
    /// Favorable move (pct of entry) at which the trailing stop arms.
    pub trailing_activation_pct: Decimal,
    /// Trailing stop distance in price terms.
    pub trailing_distance: Price,
    /// Window before settlement that counts as imminent expiration.
    pub expiration_window_secs: i64,
    /// Tick age beyond which data is stale for time-sensitive exits.
    pub staleness_window_ms: i64,
    /// Tick volume below which the market counts as a liquidity drought.
    pub min_tick_volume: Qty,
    /// Model confidence below which a position should be unwound.
    pub confidence_floor: Decimal,
    /// Spread beyond which market structure counts as adverse.
    pub adverse_spread: Price,
    /// Notional above which a position is flagged for rebalancing.
    pub rebalance_notional_cap: Decimal,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            stop_loss_pct: Decimal::from(20),
            profit_target_pct: Decimal::from(30),
            early_profit_pct: Decimal::from(15),
            trailing_activation_pct: Decimal::from(10),
            trailing_distance: Price::new(Decimal::new(5, 2)), // 0.05
            expiration_window_secs: 300,
            staleness_window_ms: 5_000,
            min_tick_volume: Qty::new(Decimal::ONE),
            confidence_floor: Decimal::new(4, 1), // 0.40
            adverse_spread: Price::new(Decimal::new(15, 2)), // 0.15
            rebalance_notional_cap: Decimal::from(5_000),
        }
    }
}

/// How strongly two markets move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationTier {
    /// Same underlying event (e.g. both sides of one game).
    Perfect,
    /// Strongly related (same team, same day).
    High,
    /// Loosely related (same league).
    Moderate,
}

impl fmt::Display for CorrelationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Perfect => write!(f, "perfect"),
            Self::High => write!(f, "high"),
            Self::Moderate => write!(f, "moderate"),
        }
    }
}

/// Exposure caps (notional) per correlation tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCaps {
    pub perfect: Decimal,
    pub high: Decimal,
    pub moderate: Decimal,
}

impl CorrelationCaps {
    pub fn cap_for(&self, tier: CorrelationTier) -> Decimal {
        match tier {
            CorrelationTier::Perfect => self.perfect,
            CorrelationTier::High => self.high,
            CorrelationTier::Moderate => self.moderate,
        }
    }
}

impl Default for CorrelationCaps {
    fn default() -> Self {
        Self {
            perfect: Decimal::from(500),
            high: Decimal::from(1_500),
            moderate: Decimal::from(4_000),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerThresholds {
    /// Daily realized loss at which trading halts.
    pub daily_loss_limit: Decimal,
    /// Maximum trades in any rolling hour.
    pub max_hourly_trades: u32,
    /// Consecutive gateway/API failures before halting.
    pub max_consecutive_api_failures: u32,
    /// Data age beyond which the breaker trips.
    pub max_data_age_ms: i64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            daily_loss_limit: Decimal::from(1_000),
            max_hourly_trades: 30,
            max_consecutive_api_failures: 5,
            max_data_age_ms: 30_000,
        }
    }
}

/// One immutable strategy/risk bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub version: ConfigVersion,
    #[serde(default)]
    pub entry: EntryThresholds,
    #[serde(default)]
    pub exit: ExitThresholds,
    #[serde(default)]
    pub correlation: CorrelationCaps,
    #[serde(default)]
    pub breakers: BreakerThresholds,
    /// Per-position size limit in contracts.
    #[serde(default = "default_max_position_qty")]
    pub max_position_qty: Qty,
}

fn default_max_position_qty() -> Qty {
    Qty::new(Decimal::from(1_000))
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::default(),
            entry: EntryThresholds::default(),
            exit: ExitThresholds::default(),
            correlation: CorrelationCaps::default(),
            breakers: BreakerThresholds::default(),
            max_position_qty: default_max_position_qty(),
        }
    }
}

/// Version-keyed store of published configs.
///
/// A published version is never mutated; rolling thresholds means
/// publishing a new version and making it current. Positions keep
/// resolving against the version they were opened with.
#[derive(Default)]
pub struct ConfigStore {
    versions: RwLock<HashMap<ConfigVersion, Arc<StrategyConfig>>>,
    current: RwLock<ConfigVersion>,
}

impl ConfigStore {
    pub fn new(initial: StrategyConfig) -> Self {
        let version = initial.version;
        let mut map = HashMap::new();
        map.insert(version, Arc::new(initial));
        Self {
            versions: RwLock::new(map),
            current: RwLock::new(version),
        }
    }

    /// Publish a new version and make it current.
    pub fn publish(&self, config: StrategyConfig) -> ConfigVersion {
        let version = config.version;
        self.versions.write().insert(version, Arc::new(config));
        *self.current.write() = version;
        version
    }

    /// Resolve an exact version (used for position attribution).
    pub fn get(&self, version: ConfigVersion) -> Option<Arc<StrategyConfig>> {
        self.versions.read().get(&version).cloned()
    }

    pub fn current_version(&self) -> ConfigVersion {
        *self.current.read()
    }

    pub fn current(&self) -> Option<Arc<StrategyConfig>> {
        self.get(self.current_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_publish_does_not_disturb_old_versions() {
        let mut v1 = StrategyConfig::default();
        v1.version = ConfigVersion::new(1);
        v1.exit.stop_loss_pct = dec!(20);

        let store = ConfigStore::new(v1);

        let mut v2 = StrategyConfig::default();
        v2.version = ConfigVersion::new(2);
        v2.exit.stop_loss_pct = dec!(10);
        store.publish(v2);

        assert_eq!(store.current_version(), ConfigVersion::new(2));
        // Attribution: the old bundle is still resolvable, unchanged.
        let old = store.get(ConfigVersion::new(1)).unwrap();
        assert_eq!(old.exit.stop_loss_pct, dec!(20));
    }

    #[test]
    fn test_correlation_caps_lookup() {
        let caps = CorrelationCaps::default();
        assert!(caps.cap_for(CorrelationTier::Perfect) < caps.cap_for(CorrelationTier::High));
        assert!(caps.cap_for(CorrelationTier::High) < caps.cap_for(CorrelationTier::Moderate));
    }
}
