//! Pre-trade risk checks.
//!
//! [`gate::RiskGate`] is a pure decision function over explicit inputs;
//! [`breakers::CircuitBreakers`] carries the little rolling state the gate
//! consults (daily loss, hourly trade count, consecutive API failures).
//! Every block carries the measured value and the threshold it broke.

pub mod breakers;
pub mod gate;

pub use breakers::{BreakerTrip, CircuitBreakers};
pub use gate::{BlockReason, EntryCheck, EscalationCheck, RiskGate};
