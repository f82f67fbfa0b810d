#![deny(unused)]
//! Codebox: validated, isolated execution of untrusted code.
//!
//! Reads one execution request as JSON on stdin, runs it and prints the
//! structured result as JSON on stdout. An optional first argument names a
//! configuration file; otherwise `config/` and `CODEBOX__*` variables apply.

use anyhow::Context;
use std::io::Read;
use std::sync::Arc;

use codebox_core::config::AppConfig;
use codebox_core::ExecutionRequest;
use codebox_orchestrator::{ExecutionOrchestrator, RuntimeContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => AppConfig::load().context("Failed to load configuration")?,
    };

    codebox_telemetry::configure_tracing(config.telemetry.json_logs)?;
    tracing::info!("Starting Codebox v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.telemetry.metrics_enabled {
        Some(codebox_telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request from stdin")?;
    let request: ExecutionRequest = serde_json::from_str(&input)
        .context("Request must be a JSON object with `language` and `code`")?;

    // =========================================================================
    // Runtime context: policy, validator, monitor, executors
    // =========================================================================
    let context = Arc::new(RuntimeContext::init(config).await?);
    if context.is_fallback_mode() {
        tracing::warn!("Running in fallback mode, guest code is not isolated");
    }
    let orchestrator = ExecutionOrchestrator::new(context);

    let outcome = orchestrator.execute_code(request).await;
    orchestrator.shutdown().await;
    let result = outcome?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(handle) = metrics_handle {
        tracing::debug!(metrics = %handle.render(), "Final metrics snapshot");
    }
    codebox_telemetry::shutdown_tracing();
    Ok(())
}
