//! OpenTelemetry tracing export
//!
//! Spans produced by `#[instrument]` are exported over OTLP when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::KeyValue;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::{warn, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

const SERVICE_NAME: &str = "experiment-operator";

/// Build the OpenTelemetry layer for the given subscriber
///
/// Returns `None` when the OTLP pipeline cannot be installed, so the
/// operator keeps running with stdout logging only.
pub fn init_telemetry<S>(_registry: &S) -> Option<OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            warn!("Failed to install OTLP pipeline: {}", e);
            None
        }
    }
}

/// Flush pending spans before exit
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
