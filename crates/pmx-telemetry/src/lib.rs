//! Telemetry for the pmx engine: structured logging, Prometheus metrics and
//! the engine event bus.

pub mod bus;
pub mod error;
pub mod logging;
pub mod metrics;

pub use bus::EventBus;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
