//! Observability for the engine: structured logging and counters.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{EngineMetrics, MetricsSnapshot};
