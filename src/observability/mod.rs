//! Observability: structured logging and Prometheus metrics.

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
