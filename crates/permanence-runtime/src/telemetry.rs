//! Tracing pipeline initialisation.
//!
//! Call [`init_tracing`] once at process startup.  Logs always go to
//! **stderr**: stdout is reserved for the output event stream.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `PERMANENCE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = permanence_runtime::telemetry::init_tracing("permanence");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log line format selected by `PERMANENCE_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("PERMANENCE_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// The OTLP layer is added only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
/// Installing twice is harmless: the second call reports to stderr and keeps
/// the first subscriber.
///
/// The returned [`TracerProviderGuard`] must be held for the lifetime of the
/// process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env();
    let provider = build_provider(service_name);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("permanence")));
    let json_layer =
        (format == LogFormat::Json).then(|| fmt::layer().json().with_writer(std::io::stderr));
    let compact_layer =
        (format == LogFormat::Compact).then(|| fmt::layer().compact().with_writer(std::io::stderr));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
    {
        eprintln!("[permanence] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[permanence] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// `None` when no endpoint is configured or the exporter fails to build.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[permanence] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: tracing is initialised before the Tokio runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
