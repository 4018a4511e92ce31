//! Telemetry pipeline assembly.
//!
//! Builds the OpenTelemetry tracer and meter providers with their OTLP/HTTP
//! exporters, installs the global tracer and metrics recorder, and owns the
//! flush and shutdown of both. The SDK export threads run outside the Tokio
//! runtime; their blocking flush calls are moved onto the blocking pool.

use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tokio::time;

use crate::config::TelemetryConfig;
use crate::observability::metrics::{build_meter_provider, install_recorder};
use crate::observability::tracing::{set_global_tracer, Tracer, INSTRUMENTATION_NAME};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] ExporterBuildError),
}

/// Identity of the process emitting telemetry.
pub fn resource(config: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build()
}

/// Running telemetry pipeline.
pub struct Telemetry {
    tracer_provider: SdkTracerProvider,
    meter_provider: Option<SdkMeterProvider>,
    tracer: Tracer,
    prometheus: Option<PrometheusHandle>,
}

impl Telemetry {
    /// Build the exporters and install the global tracer and metrics
    /// recorder. Logging is usually not up yet, so nothing is logged here.
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let resource = resource(config);
        let export_timeout = Duration::from_secs(config.export_timeout_secs);

        let mut builder = SdkTracerProvider::builder().with_resource(resource.clone());
        if config.traces_enabled {
            let exporter = SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(traces_url(&config.otlp_endpoint))
                .with_timeout(export_timeout)
                .build()?;
            let batch = BatchConfigBuilder::default()
                .with_max_queue_size(config.span_queue_capacity)
                .with_max_export_batch_size(config.span_batch_size)
                .with_scheduled_delay(Duration::from_millis(config.span_flush_interval_ms))
                .build();
            builder = builder.with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch)
                    .build(),
            );
        }
        let tracer_provider = builder.build();
        let tracer = Tracer::from_provider(&tracer_provider);
        // Tests may have installed one already; the first wins.
        let _ = set_global_tracer(tracer.clone());

        let meter_provider = config
            .metrics_endpoint
            .as_deref()
            .map(|endpoint| {
                build_meter_provider(
                    endpoint,
                    Duration::from_secs(config.metrics_interval_secs),
                    export_timeout,
                    resource,
                )
            })
            .transpose()?;
        let prometheus = install_recorder(
            meter_provider
                .as_ref()
                .map(|provider| provider.meter(INSTRUMENTATION_NAME)),
            &config.service_name,
            config.prometheus_enabled,
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
            tracer,
            prometheus,
        })
    }

    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    /// SDK tracer for the `tracing` bridge layer installed with logging.
    pub fn sdk_tracer(&self) -> SdkTracer {
        self.tracer.sdk_tracer()
    }

    /// Handle for rendering the Prometheus scrape output, when enabled.
    pub fn prometheus(&self) -> Option<PrometheusHandle> {
        self.prometheus.clone()
    }

    /// Log what is being exported and where.
    pub fn log_summary(&self, config: &TelemetryConfig) {
        if config.traces_enabled {
            tracing::info!(url = %traces_url(&config.otlp_endpoint), "Span export enabled");
        } else {
            tracing::info!("Span export disabled");
        }
        match &config.metrics_endpoint {
            Some(endpoint) => tracing::info!(
                endpoint = %endpoint,
                interval_secs = config.metrics_interval_secs,
                "Metrics push enabled"
            ),
            None => tracing::info!("Metrics push disabled"),
        }
    }

    /// Export everything ended or recorded so far without stopping.
    pub async fn flush(&self) {
        let tracer_provider = self.tracer_provider.clone();
        let meter_provider = self.meter_provider.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            if let Err(e) = tracer_provider.force_flush() {
                tracing::warn!(error = %e, "Span flush failed");
            }
            if let Some(provider) = meter_provider {
                if let Err(e) = provider.force_flush() {
                    tracing::warn!(error = %e, "Metrics flush failed");
                }
            }
        })
        .await;
        if let Err(e) = flushed {
            tracing::warn!(error = %e, "Telemetry flush task failed");
        }
    }

    /// Flush pending spans and metrics and stop the exporters, waiting at
    /// most `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        tracing::info!("Flushing telemetry");
        let Telemetry {
            tracer_provider,
            meter_provider,
            ..
        } = self;

        let stopped = tokio::task::spawn_blocking(move || {
            if let Err(e) = tracer_provider.shutdown() {
                tracing::warn!(error = %e, "Span exporter shutdown failed");
            }
            if let Some(provider) = meter_provider {
                if let Err(e) = provider.shutdown() {
                    tracing::warn!(error = %e, "Metrics exporter shutdown failed");
                }
            }
        });

        match time::timeout(timeout, stopped).await {
            Ok(Ok(())) => tracing::debug!("Telemetry stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Telemetry shutdown task failed"),
            Err(_) => tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Telemetry did not stop in time"
            ),
        }
    }
}

fn traces_url(collector: &str) -> String {
    format!("{}/v1/traces", collector.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traces_url_appends_signal_path() {
        assert_eq!(traces_url("http://localhost:4318"), "http://localhost:4318/v1/traces");
        assert_eq!(traces_url("http://jaeger:4318/"), "http://jaeger:4318/v1/traces");
    }

    #[test]
    fn test_resource_identifies_service() {
        let config = TelemetryConfig {
            service_name: "demo-backend".into(),
            service_version: "2.1.0".into(),
            environment: "staging".into(),
            ..TelemetryConfig::default()
        };

        let resource = resource(&config);
        let get = |key: &str| {
            resource
                .get(&opentelemetry::Key::from(key.to_string()))
                .map(|v| v.as_str().into_owned())
        };
        assert_eq!(get("service.name").as_deref(), Some("demo-backend"));
        assert_eq!(get("service.version").as_deref(), Some("2.1.0"));
        assert_eq!(get("deployment.environment").as_deref(), Some("staging"));
    }
}
