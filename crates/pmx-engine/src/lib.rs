//! The execution engine: one monitor loop per process.
//!
//! Ticks come in from the feed supervisor, positions are evaluated against
//! their entry-time config version, triggered exits are dispatched to walk
//! tasks, and walk results flow back into the same loop. Evaluation cadence
//! per market follows its [`throttle::MarketRegime`].

pub mod entry;
pub mod error;
pub mod ledger;
pub mod memory_store;
pub mod monitor;
pub mod throttle;

pub use entry::{EntryManager, EntryRequest};
pub use error::{EngineError, EngineResult};
pub use ledger::BalanceLedger;
pub use memory_store::MemoryPositionStore;
pub use monitor::{Monitor, MonitorConfig};
pub use throttle::{MarketRegime, RegimeTracker};
