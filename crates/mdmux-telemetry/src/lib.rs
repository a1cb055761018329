//! Prometheus metrics and structured logging for the market data multiplexer.
//!
//! - Prometheus metrics for upstream subscriptions, consumer churn and
//!   batcher flushes
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{gather_text, Metrics};
