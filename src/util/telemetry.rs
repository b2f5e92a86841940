//! Log subscriber and OpenTelemetry export.
//!
//! A `fmt` subscriber filtered by `RUST_LOG` (default `info`) is always installed. With the
//! `telemetry` feature, setting any of `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_EXPORTER_OTLP_HEADERS`
//! or `OTEL_EXPORTER_OTLP_PROTOCOL` also exports spans and metrics over OTLP. Events carrying a
//! `monotonic_counter.*` field become counters through `tracing_opentelemetry::MetricsLayer`.

use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, HttpMakeClassifier, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use std::env;

#[cfg(feature = "telemetry")]
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
#[cfg(feature = "telemetry")]
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};

/// OTLP transport, picked from `OTEL_EXPORTER_OTLP_PROTOCOL`.
#[cfg(feature = "telemetry")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelemetryProtocol {
    Http,
    Grpc,
}

#[cfg(feature = "telemetry")]
impl TelemetryProtocol {
    /// `None` when no OTLP variable is set.
    fn from_env() -> Option<Self> {
        let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
        if !is_enabled {
            return None;
        }
        let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => TelemetryProtocol::Grpc,
            _ => TelemetryProtocol::Http,
        };
        Some(protocol)
    }
}

/// Builder for the process-wide subscriber.
#[derive(Debug, Clone, Default)]
#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
pub struct Telemetry {
    name: Option<String>,
    version: Option<String>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Installs the global subscriber. Keep the returned value alive for the lifetime of the
    /// process: dropping it flushes and shuts down the exporters.
    pub fn register(self) -> TelemetryProviders {
        #[cfg(feature = "telemetry")]
        if let Some(protocol) = TelemetryProtocol::from_env() {
            match self.init_otel(protocol) {
                Ok(providers) => return providers,
                Err(error) => eprintln!("OpenTelemetry export disabled: {error}"),
            }
        }

        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        if let Err(error) = installed {
            eprintln!("Tracing subscriber already installed: {error}");
        }
        tracing::debug!("OpenTelemetry is not enabled");
        TelemetryProviders::default()
    }

    #[cfg(feature = "telemetry")]
    fn init_otel(
        &self,
        protocol: TelemetryProtocol,
    ) -> Result<TelemetryProviders, opentelemetry_otlp::ExporterBuildError> {
        let resource = self.resource();

        let span_exporter = opentelemetry_otlp::SpanExporter::builder();
        let span_exporter = match protocol {
            TelemetryProtocol::Http => span_exporter.with_http().build()?,
            TelemetryProtocol::Grpc => span_exporter.with_tonic().build()?,
        };
        let tracer_provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource.clone())
            .with_batch_exporter(span_exporter)
            .build();

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder();
        let metric_exporter = match protocol {
            TelemetryProtocol::Http => metric_exporter.with_http().build()?,
            TelemetryProtocol::Grpc => metric_exporter.with_tonic().build()?,
        };
        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(std::time::Duration::from_secs(30))
            .build();
        let meter_provider = MeterProviderBuilder::default()
            .with_resource(resource)
            .with_reader(reader)
            .build();
        global::set_meter_provider(meter_provider.clone());

        let tracer = tracer_provider.tracer(self.service_name());
        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(MetricsLayer::new(meter_provider.clone()))
            .with(OpenTelemetryLayer::new(tracer))
            .try_init();
        if let Err(error) = installed {
            eprintln!("Tracing subscriber already installed: {error}");
        }
        tracing::info!(?protocol, "OpenTelemetry tracing and metrics export enabled");

        Ok(TelemetryProviders {
            tracer_provider: Some(tracer_provider),
            meter_provider: Some(meter_provider),
        })
    }

    #[cfg(feature = "telemetry")]
    fn service_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
    }

    #[cfg(feature = "telemetry")]
    fn resource(&self) -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        let version = self
            .version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        Resource::builder()
            .with_service_name(self.service_name())
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, version),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Handles to the installed exporters, shut down on drop.
#[derive(Default)]
pub struct TelemetryProviders {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    #[cfg(feature = "telemetry")]
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryProviders {
    /// One span per HTTP request, with the response logged at `INFO`.
    pub fn http_tracing(&self) -> TraceLayer<HttpMakeClassifier> {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}

impl Drop for TelemetryProviders {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        {
            if let Some(tracer_provider) = self.tracer_provider.take() {
                if let Err(err) = tracer_provider.shutdown() {
                    eprintln!("{err:?}");
                }
            }
            if let Some(meter_provider) = self.meter_provider.take() {
                if let Err(err) = meter_provider.shutdown() {
                    eprintln!("{err:?}");
                }
            }
        }
    }
}
