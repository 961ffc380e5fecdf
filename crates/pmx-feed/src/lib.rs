//! Market data feed supervision.
//!
//! The connection lifecycle is split in two: [`machine::ConnectionMachine`]
//! is the pure state machine (transitions, backoff schedule, reconnect
//! budget), and [`supervisor::FeedSupervisor`] drives it against a real
//! [`pmx_core::MarketDataSource`], handling connect timeouts, heartbeat
//! staleness, gap replay after reconnects and the polling fallback.

pub mod error;
pub mod machine;
pub mod supervisor;

pub use error::{FeedError, FeedResult};
pub use machine::{ConnEvent, ConnectionMachine};
pub use supervisor::{FeedConfig, FeedSupervisor};
