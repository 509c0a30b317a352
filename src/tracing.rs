//! OpenTelemetry tracing for distributed observability
//!
//! Traces are exported to an OTLP collector; logs carry trace context so
//! audit and channel activity can be correlated. When no collector is
//! reachable the daemon falls back to plain console logging rather than
//! refusing to start; observability failing must never take the control
//! plane down with it.

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use opentelemetry::KeyValue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default OTLP endpoint (OTel collector)
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Initialize the tracing subsystem.
///
/// With an OTLP endpoint, installs the full export pipeline; without one
/// (or when the exporter cannot be built) only console logging is set up.
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,alopexd=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let endpoint = otlp_endpoint.unwrap_or(DEFAULT_OTLP_ENDPOINT);
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let pipeline = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", service_name.to_string()),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])),
        )
        .install_batch(runtime::Tokio);

    match pipeline {
        Ok(tracer) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
            tracing::info!(
                service = service_name,
                endpoint = endpoint,
                "OpenTelemetry tracing initialized"
            );
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
            tracing::warn!(
                error = %e,
                "OTLP exporter unavailable, console logging only"
            );
        }
    }

    Ok(())
}

/// Shutdown the tracing subsystem gracefully, flushing pending spans.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
