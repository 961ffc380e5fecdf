//! Exit execution by staged price walking.
//!
//! An exit starts as a passive limit at the touch and walks across the
//! spread on a fixed schedule; how the walk is allowed to end is decided
//! by the signal's priority (marketable escalation, give-up, or cancel).

pub mod cache;
pub mod gateway;
pub mod stage;
pub mod walker;

pub use cache::TickCache;
pub use gateway::SerializedGateway;
pub use stage::WalkStage;
pub use walker::{WalkOutcome, WalkResult, Walker};
