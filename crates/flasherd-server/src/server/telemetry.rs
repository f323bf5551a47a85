//! # Telemetry
//!
//! Logs always go to the console through `tracing_subscriber::fmt`, filtered
//! by `RUST_LOG` (default `info`). OpenTelemetry export is optional.
//!
//! ## Feature matrix
//!
//! - `otel`: Export spans (one `invocation` span per call) through
//!   OpenTelemetry.
//! - `metrics`: Export invocation counters and histograms.
//! - `otlp`: OTLP/gRPC exporter. The collector address is taken from
//!   `OTEL_EXPORTER_OTLP_ENDPOINT`.
//! - `stdout`: stdout exporter, useful locally.
//!
//! Exporters require at least one of `otel` or `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://collector:4317 \
//!     cargo run --features otel,metrics,otlp
//! ```
//!
//! Without `metrics` every `record_*`/`increment_*` helper below compiles to
//! a no-op, so call sites never need their own `cfg`.

#[cfg(all(feature = "otlp", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'otel' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "otel")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

/// Providers that must outlive the server so buffered telemetry is flushed
/// on shutdown.
pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        if let Err(e) = self.tracer_provider.shutdown() {
            tracing::warn!("Failed to flush traces: {e}");
        }
        #[cfg(feature = "metrics")]
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!("Failed to flush metrics: {e}");
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder("flasherd")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("flasherd")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let reader = sdkmetrics::PeriodicReader::builder(MetricExporter::default())
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(Compression::Gzip)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(batch_config())
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(Compression::Gzip)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build span exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config())
            .build();
        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

#[cfg(all(feature = "otel", any(feature = "stdout", feature = "otlp")))]
fn batch_config() -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(std::time::Duration::from_secs(5))
        .with_max_queue_size(2048)
        .build()
}

#[cfg(feature = "metrics")]
static INVOCATIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static INVOCATIONS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static INVOCATION_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static INVOCATION_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STAGED_BYTES: OnceLock<Histogram<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static OUTPUT_FRAMES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = INVOCATIONS.set(
        meter
            .u64_counter("invocations")
            .with_description("Total RunCommand calls")
            .build(),
    );

    let _ = INVOCATIONS_INFLIGHT.set(
        meter
            .i64_up_down_counter("invocations_inflight")
            .with_description("Invocations currently held by a worker")
            .build(),
    );

    let _ = INVOCATION_ERRORS.set(
        meter
            .u64_counter("invocation_errors")
            .with_description("Failed or cancelled invocations")
            .build(),
    );

    let _ = INVOCATION_DURATION_MS.set(
        meter
            .f64_histogram("invocation_duration")
            .with_unit("ms")
            .with_description("Time from acceptance to completion")
            .build(),
    );

    let _ = STAGED_BYTES.set(
        meter
            .u64_histogram("staged_bytes")
            .with_unit("By")
            .with_description("Bytes staged per invocation")
            .build(),
    );

    let _ = OUTPUT_FRAMES.set(
        meter
            .u64_counter("output_frames")
            .with_description("Stdout and stderr frames sent to clients")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_invocations() {
    if let Some(counter) = INVOCATIONS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_invocations() {}

#[cfg(feature = "metrics")]
pub fn increment_invocations_inflight() {
    if let Some(counter) = INVOCATIONS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_invocations_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_invocations_inflight() {
    if let Some(counter) = INVOCATIONS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_invocations_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_invocation_errors() {
    if let Some(counter) = INVOCATION_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_invocation_errors() {}

#[cfg(feature = "metrics")]
pub fn record_invocation_duration(duration_ms: f64) {
    if let Some(histogram) = INVOCATION_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_invocation_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn record_staged_bytes(bytes: u64) {
    if let Some(histogram) = STAGED_BYTES.get() {
        histogram.record(bytes, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_staged_bytes(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_output_frames() {
    if let Some(counter) = OUTPUT_FRAMES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_output_frames() {}
