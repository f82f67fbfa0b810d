//! Subscriber setup with optional OTLP export.

use codebox_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,codebox=debug";
const SERVICE_NAME: &str = "codebox";

/// Install the global subscriber: env filter, fmt (or JSON) output and, when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry layer.
pub fn configure_tracing(json: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    // stdout carries results; logs go to stderr.
    let plain_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json_layer =
        json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let otel_layer = match &endpoint {
        Some(endpoint) => {
            let provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![KeyValue::new("service.name", SERVICE_NAME)],
                )))
                .install_batch(runtime::Tokio)
                .map_err(|e| Error::internal(format!("Failed to install OTLP pipeline: {}", e)))?;
            let tracer = provider.tracer(SERVICE_NAME);
            opentelemetry::global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    if let Some(endpoint) = endpoint {
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    }
    Ok(())
}

/// Flush pending spans. No-op when OTLP export is off.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_an_error() {
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        // Another test in this binary may have installed it already.
        let _ = configure_tracing(false);
        let err = configure_tracing(true).unwrap_err();
        assert!(err.to_string().contains("tracing subscriber"));
        shutdown_tracing();
    }
}
