//! Exit signals and the closed set of exit conditions.
//!
//! Conditions are a tagged enum, not open-ended polymorphism, so the
//! priority-resolution logic in the evaluator stays total and testable.

use crate::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority tier of an exit. Ord: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExitPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ExitPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Closed set of exit condition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCondition {
    StopLoss,
    ImminentExpiration,
    ProfitTarget,
    AdverseStructure,
    TrailingStop,
    LiquidityDrought,
    ConfidenceDrop,
    EarlyProfitTake,
    Rebalance,
}

impl ExitCondition {
    /// Fixed priority tier for each condition.
    pub fn priority(&self) -> ExitPriority {
        match self {
            Self::StopLoss | Self::ImminentExpiration => ExitPriority::Critical,
            Self::ProfitTarget | Self::AdverseStructure => ExitPriority::High,
            Self::TrailingStop | Self::LiquidityDrought | Self::ConfidenceDrop => {
                ExitPriority::Medium
            }
            Self::EarlyProfitTake | Self::Rebalance => ExitPriority::Low,
        }
    }

    /// Time-sensitive conditions must not fire on stale data. Imminent
    /// expiration is the one exception: the clock keeps running whether or
    /// not the feed does.
    pub fn requires_fresh_data(&self) -> bool {
        !matches!(self, Self::ImminentExpiration)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::ImminentExpiration => "imminent_expiration",
            Self::ProfitTarget => "profit_target",
            Self::AdverseStructure => "adverse_structure",
            Self::TrailingStop => "trailing_stop",
            Self::LiquidityDrought => "liquidity_drought",
            Self::ConfidenceDrop => "confidence_drop",
            Self::EarlyProfitTake => "early_profit_take",
            Self::Rebalance => "rebalance",
        }
    }
}

impl fmt::Display for ExitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Triggered exit produced by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub condition: ExitCondition,
    pub priority: ExitPriority,
    /// Deadline by which the walk must resolve (escalate or give up).
    pub deadline: DateTime<Utc>,
    /// Suggested starting limit price, in the position's side space.
    pub limit_price: Price,
    /// How far past its threshold the condition is, normalized to the
    /// threshold. Used only to break ties within a priority tier.
    pub deviation: rust_decimal::Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(ExitPriority::Critical > ExitPriority::High);
        assert!(ExitPriority::High > ExitPriority::Medium);
        assert!(ExitPriority::Medium > ExitPriority::Low);
    }

    #[test]
    fn test_condition_tiers() {
        assert_eq!(ExitCondition::StopLoss.priority(), ExitPriority::Critical);
        assert_eq!(
            ExitCondition::ImminentExpiration.priority(),
            ExitPriority::Critical
        );
        assert_eq!(ExitCondition::ProfitTarget.priority(), ExitPriority::High);
        assert_eq!(ExitCondition::TrailingStop.priority(), ExitPriority::Medium);
        assert_eq!(ExitCondition::Rebalance.priority(), ExitPriority::Low);
    }

    #[test]
    fn test_expiration_exempt_from_freshness() {
        assert!(!ExitCondition::ImminentExpiration.requires_fresh_data());
        assert!(ExitCondition::StopLoss.requires_fresh_data());
        assert!(ExitCondition::TrailingStop.requires_fresh_data());
    }
}
