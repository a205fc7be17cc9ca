//! Optional OpenTelemetry trace export.
//!
//! When a `[telemetry]` section and a `telemetry_api_key` secret are both
//! present, spans are batched and exported over OTLP/HTTP next to the
//! console output. Without them the CLI logs to the console only.
//!
//! The [`BatchSpanProcessor`] exports from its own background thread, outside
//! the tokio runtime, so it needs the blocking `reqwest` client. That client
//! is built on a separate thread to keep its construction off the runtime.

use std::collections::HashMap;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use url::Url;

use crate::config::default_filter;

const DEFAULT_SERVICE_NAME: &str = "derive-bridge";

/// Non-secret `[telemetry]` section of the config.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TelemetryConfig {
    endpoint: Url,
    service_name: Option<String>,
}

/// Telemetry settings with the API key attached.
#[derive(Debug, Clone)]
pub struct TelemetryCtx {
    pub(crate) endpoint: Url,
    pub(crate) api_key: String,
    pub(crate) service_name: String,
    pub(crate) log_level: Level,
}

impl TelemetryCtx {
    pub(crate) fn new(config: TelemetryConfig, api_key: String, log_level: Level) -> Self {
        Self {
            endpoint: config.endpoint,
            api_key,
            service_name: config
                .service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_owned()),
            log_level,
        }
    }

    /// Installs the console and OTLP layers as the global subscriber.
    pub fn setup_telemetry(&self) -> Result<TelemetryGuard, TelemetryError> {
        let headers = HashMap::from([("authorization".to_owned(), self.api_key.clone())]);

        let http_client = std::thread::spawn(|| {
            reqwest::blocking::Client::builder()
                .gzip(true)
                .build()
                .map_err(|e| format!("Failed to build HTTP client: {e}"))
        })
        .join()
        .map_err(|_| TelemetryError::ThreadSpawn)?
        .map_err(TelemetryError::HttpClient)?;

        let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_http_client(http_client)
            .with_endpoint(self.endpoint.as_str())
            .with_headers(headers)
            .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
            .build()?;

        let batch_exporter = BatchSpanProcessor::builder(otlp_exporter)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_export_batch_size(512)
                    .with_max_queue_size(2048)
                    .with_scheduled_delay(Duration::from_secs(3))
                    .build(),
            )
            .build();

        let tracer_provider = SdkTracerProvider::builder()
            .with_span_processor(batch_exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(self.service_name.clone())
                    .with_attributes(vec![KeyValue::new("deployment.environment", "prod")])
                    .build(),
            )
            .build();

        let tracer = tracer_provider.tracer(TRACER_NAME);
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let fmt_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter(self.log_level).into());
        let telemetry_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter(self.log_level).into());

        let subscriber = Registry::default()
            .with(tracing_subscriber::fmt::layer().with_filter(fmt_filter))
            .with(telemetry_layer.with_filter(telemetry_filter));

        tracing::subscriber::set_global_default(subscriber)?;

        Ok(TelemetryGuard { tracer_provider })
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter")]
    OtlpExporter(#[from] ExporterBuildError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Failed to spawn HTTP client thread")]
    ThreadSpawn,

    #[error("Failed to set global subscriber")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Flushes and shuts down the exporter when dropped.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.force_flush() {
            eprintln!("Failed to flush telemetry spans: {e:?}");
        }

        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown telemetry provider: {e:?}");
        }
    }
}

/// Instrumentation library name reported with every span. The service name
/// identifies the process; this identifies the code that made the span.
const TRACER_NAME: &str = "derive-bridge-tracer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_defaults_when_not_configured() {
        let config: TelemetryConfig =
            toml::from_str(r#"endpoint = "https://otel.example/v1/traces""#).unwrap();

        let ctx = TelemetryCtx::new(config, "key".to_owned(), Level::INFO);

        assert_eq!(ctx.service_name, "derive-bridge");
        assert_eq!(ctx.endpoint.as_str(), "https://otel.example/v1/traces");
    }

    #[test]
    fn configured_service_name_wins() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            endpoint = "https://otel.example/v1/traces"
            service_name = "bridge-ops"
            "#,
        )
        .unwrap();

        let ctx = TelemetryCtx::new(config, "key".to_owned(), Level::DEBUG);

        assert_eq!(ctx.service_name, "bridge-ops");
        assert_eq!(ctx.log_level, Level::DEBUG);
    }
}
