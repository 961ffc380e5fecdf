//! Execution engine for binary prediction market positions.
//!
//! Orchestrates the feed supervisor, the position monitor loop, exit walks
//! and the entry path; ships paper-trading adapters so the whole stack can
//! run without a broker.

pub mod app;
pub mod config;
pub mod error;
pub mod sim;

pub use app::Application;
pub use config::{AppConfig, RunMode};
pub use error::{AppError, AppResult};
pub use sim::{PaperFeed, PaperGateway};
