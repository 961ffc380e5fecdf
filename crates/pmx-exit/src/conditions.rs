//! Individual exit-condition checks.
//!
//! Every check is evaluated on every pass; nothing short-circuits. A check
//! that fires produces a [`Candidate`] whose deviation says how far past
//! its own threshold the condition is, normalized to that threshold, so
//! deviations are comparable across conditions within a priority tier.

use chrono::{DateTime, Utc};
use pmx_core::{ExitCondition, MarketTick, Position, StrategyConfig};
use rust_decimal::Decimal;

/// One fired condition, before priority resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub condition: ExitCondition,
    /// Excess past the threshold, normalized to the threshold.
    pub deviation: Decimal,
}

impl Candidate {
    fn new(condition: ExitCondition, deviation: Decimal) -> Self {
        Self {
            condition,
            deviation,
        }
    }
}

/// Excess over threshold, as a fraction of the threshold.
fn normalized(excess: Decimal, threshold: Decimal) -> Decimal {
    if threshold.is_zero() {
        excess
    } else {
        excess / threshold
    }
}

/// Evaluate all conditions for one position against one tick.
///
/// All prices are read in the position's side space, so the same checks
/// cover both outcome sides.
pub fn candidates(
    position: &Position,
    tick: &MarketTick,
    config: &StrategyConfig,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let exit = &config.exit;
    let exit_price = position.exit_price(tick);
    let mut out = Vec::new();

    if let Some(expires_at) = position.expires_at {
        let remaining = (expires_at - now).num_seconds();
        if remaining <= exit.expiration_window_secs {
            let elapsed = exit.expiration_window_secs - remaining;
            out.push(Candidate::new(
                ExitCondition::ImminentExpiration,
                normalized(
                    Decimal::from(elapsed),
                    Decimal::from(exit.expiration_window_secs),
                ),
            ));
        }
    }

    if let Some(pnl_pct) = exit_price.pct_from(position.entry_price) {
        if pnl_pct <= -exit.stop_loss_pct {
            out.push(Candidate::new(
                ExitCondition::StopLoss,
                normalized(-pnl_pct - exit.stop_loss_pct, exit.stop_loss_pct),
            ));
        }
        if pnl_pct >= exit.profit_target_pct {
            out.push(Candidate::new(
                ExitCondition::ProfitTarget,
                normalized(pnl_pct - exit.profit_target_pct, exit.profit_target_pct),
            ));
        }
        if pnl_pct >= exit.early_profit_pct {
            out.push(Candidate::new(
                ExitCondition::EarlyProfitTake,
                normalized(pnl_pct - exit.early_profit_pct, exit.early_profit_pct),
            ));
        }
    }

    if !tick.is_valid_book() {
        // A crossed or one-sided book is maximally adverse.
        out.push(Candidate::new(ExitCondition::AdverseStructure, Decimal::ONE));
    } else if tick.spread() >= exit.adverse_spread {
        out.push(Candidate::new(
            ExitCondition::AdverseStructure,
            normalized(
                (tick.spread() - exit.adverse_spread).inner(),
                exit.adverse_spread.inner(),
            ),
        ));
    }

    if let Some(stop) = position.trailing.current_stop {
        if exit_price <= stop {
            out.push(Candidate::new(
                ExitCondition::TrailingStop,
                normalized(
                    (stop - exit_price).inner(),
                    position.trailing.stop_distance.inner(),
                ),
            ));
        }
    }

    if tick.volume < exit.min_tick_volume {
        out.push(Candidate::new(
            ExitCondition::LiquidityDrought,
            normalized(
                exit.min_tick_volume.inner() - tick.volume.inner(),
                exit.min_tick_volume.inner(),
            ),
        ));
    }

    if position.model_confidence < exit.confidence_floor {
        out.push(Candidate::new(
            ExitCondition::ConfidenceDrop,
            normalized(
                exit.confidence_floor - position.model_confidence,
                exit.confidence_floor,
            ),
        ));
    }

    let notional = position.quantity.notional(exit_price);
    if notional > exit.rebalance_notional_cap {
        out.push(Candidate::new(
            ExitCondition::Rebalance,
            normalized(
                notional - exit.rebalance_notional_cap,
                exit.rebalance_notional_cap,
            ),
        ));
    }

    out
}
