//! Tracing and OpenTelemetry setup for the manager.
//!
//! Logs always go to stderr through `tracing-subscriber`. With an OTLP
//! endpoint configured, spans, metrics and log records are exported as well,
//! tagged with the replica's role and assignment mode so a fleet of managers
//! can be told apart in the backend.

pub mod metrics;
pub mod tick;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::AssignmentMode;
use crate::error::{Error, Result};

/// Resource attribute: rebroadcast assignment strategy of this replica.
pub const ASSIGNMENT_MODE_ATTRIBUTE: &str = "dq.assignment_mode";
/// Resource attribute: whether this replica runs the expiry sweeps.
pub const PRIMARY_ATTRIBUTE: &str = "dq.primary";
/// Resource attribute: per-sweep task cap.
pub const BATCH_SIZE_ATTRIBUTE: &str = "dq.batch_size";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). `None` logs to
    /// stderr only.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Manager version, reported as `service.version`.
    pub service_version: String,
    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,
    pub assignment_mode: AssignmentMode,
    pub primary: bool,
    pub batch_size: usize,
}

impl TelemetryConfig {
    /// Attributes describing this manager replica.
    pub fn manager_attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new(ASSIGNMENT_MODE_ATTRIBUTE, self.assignment_mode.as_str()),
            KeyValue::new(PRIMARY_ATTRIBUTE, self.primary),
            KeyValue::new(
                BATCH_SIZE_ATTRIBUTE,
                i64::try_from(self.batch_size).unwrap_or(i64::MAX),
            ),
        ]
    }

    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes(self.manager_attributes())
            .build()
    }
}

/// Flushes and shuts down the OTel providers when dropped. Hold it for the
/// lifetime of the process.
#[derive(Default)]
pub struct TelemetryGuard {
    pipelines: Option<OtlpPipelines>,
}

impl TelemetryGuard {
    /// Whether spans and metrics are being exported.
    pub fn is_exporting(&self) -> bool {
        self.pipelines.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(p) = self.pipelines.take() {
            let _ = p.logs.shutdown();
            let _ = p.metrics.shutdown();
            let _ = p.traces.shutdown();
        }
    }
}

struct OtlpPipelines {
    traces: SdkTracerProvider,
    metrics: SdkMeterProvider,
    logs: SdkLoggerProvider,
}

fn exporter_error<E: std::fmt::Display>(signal: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

impl OtlpPipelines {
    fn build(endpoint: &str, resource: Resource) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig as _;

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("span"))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("metric"))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("log"))?;

        Ok(Self {
            traces: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            metrics: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logs: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }
}

/// Install the global subscriber, plus OTLP export when an endpoint is set.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already
/// installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber_error = |e: tracing_subscriber::util::TryInitError| {
        Error::Other(format!("failed to init tracing subscriber: {e}"))
    };

    let Some(endpoint) = config.endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(subscriber_error)?;
        return Ok(TelemetryGuard::default());
    };

    let pipelines = OtlpPipelines::build(endpoint, config.resource())?;
    opentelemetry::global::set_meter_provider(pipelines.metrics.clone());

    let tracer = pipelines.traces.tracer("delegate-queue");
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
            &pipelines.logs,
        ))
        .try_init()
        .map_err(subscriber_error)?;

    Ok(TelemetryGuard {
        pipelines: Some(pipelines),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            endpoint: None,
            service_name: "dq-manager".to_string(),
            service_version: "1.2.3".to_string(),
            log_level: "info".to_string(),
            assignment_mode: AssignmentMode::PerAccount,
            primary: false,
            batch_size: 50,
        }
    }

    #[test]
    fn resource_describes_the_replica() {
        let resource = config().resource();
        assert_eq!(
            resource.get(&Key::new(ASSIGNMENT_MODE_ATTRIBUTE)),
            Some(Value::from("per-account"))
        );
        assert_eq!(
            resource.get(&Key::new(PRIMARY_ATTRIBUTE)),
            Some(Value::Bool(false))
        );
        assert_eq!(
            resource.get(&Key::new(BATCH_SIZE_ATTRIBUTE)),
            Some(Value::I64(50))
        );
        assert_eq!(
            resource.get(&Key::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION
            )),
            Some(Value::from("1.2.3"))
        );
        assert_eq!(
            resource.get(&Key::new("service.name")),
            Some(Value::from("dq-manager"))
        );
    }
}
