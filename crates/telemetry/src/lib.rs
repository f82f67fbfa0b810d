//! Logging, tracing export and metrics for Codebox.

pub mod metrics;
pub mod tracing_layer;

pub use self::metrics::{
    record_execution, record_security_rejection, set_active_environments, setup_metrics_recorder,
};
pub use tracing_layer::{configure_tracing, shutdown_tracing};
