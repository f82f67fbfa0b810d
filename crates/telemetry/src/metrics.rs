//! Prometheus metrics.

use codebox_core::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const EXECUTIONS_TOTAL: &str = "codebox_executions_total";
pub const EXECUTION_DURATION_SECONDS: &str = "codebox_execution_duration_seconds";
pub const SECURITY_REJECTIONS_TOTAL: &str = "codebox_security_rejections_total";
pub const ACTIVE_ENVIRONMENTS: &str = "codebox_active_environments";

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count one finished execution and record its wall time.
pub fn record_execution(language: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        EXECUTIONS_TOTAL,
        "language" => language.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(EXECUTION_DURATION_SECONDS, "language" => language.to_string())
        .record(duration_secs);
}

pub fn record_security_rejection(language: &str, risk: &str) {
    metrics::counter!(
        SECURITY_REJECTIONS_TOTAL,
        "language" => language.to_string(),
        "risk" => risk.to_string()
    )
    .increment(1);
}

pub fn set_active_environments(count: usize) {
    metrics::gauge!(ACTIVE_ENVIRONMENTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_render_through_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_execution("python", "COMPLETED", 0.25);
            record_execution("python", "COMPLETED", 0.5);
            record_security_rejection("shell", "CRITICAL");
            set_active_environments(3);
        });

        let rendered = handle.render();
        assert!(rendered.contains(EXECUTIONS_TOTAL));
        assert!(rendered.contains("status=\"COMPLETED\""));
        assert!(rendered.contains("risk=\"CRITICAL\""));
        assert!(rendered.contains(ACTIVE_ENVIRONMENTS));
    }

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        record_execution("javascript", "FAILED", 1.0);
        set_active_environments(0);
    }
}
