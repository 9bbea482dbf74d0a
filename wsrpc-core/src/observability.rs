//! Logging, tracing and metrics initialization
//!
//! wsrpc emits `tracing` events and spans everywhere and records metrics
//! through the global OpenTelemetry meter. Nothing is installed implicitly;
//! binaries call [`init_observability`] once at startup and keep the returned
//! [`ObservabilityGuard`] alive until shutdown.
//!
//! The installed pipeline is:
//!
//! 1. an `EnvFilter` built from `RUST_LOG`, falling back to the configured filter
//! 2. a `fmt` layer writing JSON or compact lines to stdout
//! 3. when an OTLP endpoint is configured, an OpenTelemetry layer exporting
//!    spans, and a meter provider exporting metrics every 30 seconds
//!
//! ```rust,no_run
//! use wsrpc_core::{init_observability, ObservabilityConfig};
//!
//! #[tokio::main]
//! async fn main() -> wsrpc_core::Result<()> {
//!     let guard = init_observability(
//!         &ObservabilityConfig::new("chat-server")
//!             .with_endpoint("http://localhost:4317")
//!             .with_log_filter("wsrpc_server=debug,info"),
//!     )?;
//!
//!     // ... run the server ...
//!
//!     guard.shutdown();
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the local log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, with target, thread id and line number
    #[default]
    Json,
    /// Human-readable single-line output
    Compact,
}

/// Observability configuration
///
/// # Defaults
///
/// - service name `"wsrpc"`, version of this crate
/// - OTLP endpoint from `OTEL_EXPORTER_OTLP_ENDPOINT`, otherwise none (no export)
/// - log filter from `RUST_LOG`, otherwise `"info"`
/// - JSON log lines, traces and metrics enabled when an endpoint is set
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,
    /// Service version attached to every span and metric
    pub service_version: String,
    /// OTLP/gRPC collector endpoint; `None` keeps everything local
    pub otlp_endpoint: Option<String>,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Local log format
    pub log_format: LogFormat,
    /// Export spans (requires an endpoint)
    pub enable_traces: bool,
    /// Export metrics (requires an endpoint)
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "wsrpc".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: LogFormat::Json,
            enable_traces: true,
            enable_metrics: true,
        }
    }
}

impl ObservabilityConfig {
    /// Configuration for `service_name` with every other field defaulted
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Export to an OTLP/gRPC collector
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Keep telemetry local
    pub fn without_export(mut self) -> Self {
        self.otlp_endpoint = None;
        self
    }

    /// Set the fallback `EnvFilter` directives
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Set the local log format
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    fn exports_traces(&self) -> bool {
        self.enable_traces && self.otlp_endpoint.is_some()
    }

    fn exports_metrics(&self) -> bool {
        self.enable_metrics && self.otlp_endpoint.is_some()
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Keeps exporter providers alive; flushes them on [`shutdown`](Self::shutdown)
/// or drop.
#[derive(Default)]
pub struct ObservabilityGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl ObservabilityGuard {
    /// `true` when spans are exported
    pub fn exports_traces(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// `true` when metrics are exported
    pub fn exports_metrics(&self) -> bool {
        self.meter_provider.is_some()
    }

    /// Flush and shut down the exporters
    pub fn shutdown(mut self) {
        self.shutdown_providers();
    }

    fn shutdown_providers(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Tracer provider shutdown failed");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Meter provider shutdown failed");
            }
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        self.shutdown_providers();
    }
}

/// Install the global subscriber and, if configured, the OTLP exporters
///
/// # Errors
///
/// - [`Error::Config`] for invalid filter directives or when a global
///   subscriber is already installed
/// - [`Error::Internal`] when an exporter cannot be built
pub fn init_observability(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let mut guard = ObservabilityGuard::default();

    let tracer = if config.exports_traces() {
        let (provider, tracer) = init_tracer(config)?;
        guard.tracer_provider = Some(provider);
        Some(tracer)
    } else {
        None
    };

    if config.exports_metrics() {
        guard.meter_provider = Some(init_metrics(config)?);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| Error::Config(format!("invalid log filter: {e}")))?;

    let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("subscriber already installed: {e}")))?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = ?config.otlp_endpoint,
        traces = guard.exports_traces(),
        metrics = guard.exports_metrics(),
        "Observability initialized"
    );

    Ok(guard)
}

fn init_tracer(
    config: &ObservabilityConfig,
) -> Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer)> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let mut builder = opentelemetry_otlp::SpanExporter::builder().with_tonic();
    if let Some(endpoint) = &config.otlp_endpoint {
        builder = builder.with_endpoint(endpoint.clone());
    }
    let exporter = builder
        .build()
        .map_err(|e| Error::Internal(format!("span exporter: {e}")))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider.clone());

    Ok((provider, tracer))
}

fn init_metrics(config: &ObservabilityConfig) -> Result<SdkMeterProvider> {
    let mut builder = opentelemetry_otlp::MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.otlp_endpoint {
        builder = builder.with_endpoint(endpoint.clone());
    }
    let exporter = builder
        .build()
        .map_err(|e| Error::Internal(format!("metric exporter: {e}")))?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ObservabilityConfig::new("svc")
            .with_endpoint("http://collector:4317")
            .with_log_filter("debug")
            .with_log_format(LogFormat::Compact)
            .with_version("1.2.3")
            .with_metrics(false);

        assert_eq!(config.service_name, "svc");
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.service_version, "1.2.3");
        assert!(config.exports_traces());
        assert!(!config.exports_metrics());
    }

    #[test]
    fn test_no_export_without_endpoint() {
        let config = ObservabilityConfig::new("svc").without_export();

        assert!(config.enable_traces);
        assert!(!config.exports_traces());
        assert!(!config.exports_metrics());
    }

    #[test]
    fn test_init_local_only_then_reject_second_install() {
        let config = ObservabilityConfig::new("svc")
            .without_export()
            .with_log_filter("warn");

        let guard = init_observability(&config).unwrap();
        assert!(!guard.exports_traces());
        assert!(!guard.exports_metrics());

        let second = init_observability(&config);
        assert!(matches!(second, Err(Error::Config(_))));

        guard.shutdown();
    }

    #[test]
    fn test_guard_default_shutdown_is_noop() {
        let guard = ObservabilityGuard::default();
        guard.shutdown();
    }
}
