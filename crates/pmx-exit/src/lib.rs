//! Exit-condition evaluation.
//!
//! Pure functions from `(position, tick, config, now)` to an exit decision.
//! No I/O, no clocks, no shared state: the monitor loop supplies a single
//! consistent snapshot per pass and acts on the outcome.

pub mod conditions;
pub mod evaluator;

pub use conditions::{candidates, Candidate};
pub use evaluator::{evaluate, escalation_window_secs, EvalOutcome};
