//! Logging and OpenTelemetry tracing setup.
//!
//! Console output is always installed (JSON or pretty). When
//! `observability.tracing.enabled` is set, spans are also exported over OTLP;
//! if the exporter cannot be built the process keeps console logging only.
//!
//! `RUST_LOG` overrides `observability.logging.level`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::telemetry::init_telemetry;
//!
//! let _guard = init_telemetry(&config.observability);
//! ```

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, ObservabilityConfig};

/// Guard that shuts down the tracer provider on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported over OTLP.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e:?}");
            }
        }
    }
}

fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn fmt_layer<S>(logging: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer().with_target(logging.include_target);
    if logging.format == "json" {
        layer.json().with_ansi(false).boxed()
    } else {
        layer.pretty().boxed()
    }
}

/// Initialize logging and, when enabled, OTLP span export.
///
/// Returns a guard that will shut down the tracer provider when dropped.
/// A second call in the same process leaves the first subscriber in place.
#[must_use]
pub fn init_telemetry(config: &ObservabilityConfig) -> TelemetryGuard {
    let logging = &config.logging;

    if !config.tracing.enabled {
        let _ = Registry::default()
            .with(env_filter(logging))
            .with(fmt_layer(logging))
            .try_init();
        tracing::info!("OpenTelemetry disabled, using console logging only");
        return TelemetryGuard { provider: None };
    }

    let endpoint = &config.tracing.otlp_endpoint;
    let service_name = config.tracing.service_name.clone();

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exp) => exp,
        Err(e) => {
            let _ = Registry::default()
                .with(env_filter(logging))
                .with(fmt_layer(logging))
                .try_init();
            tracing::warn!(
                error = %e,
                endpoint = %endpoint,
                "Failed to create OTLP exporter, falling back to console logging"
            );
            return TelemetryGuard { provider: None };
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer(service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let _ = Registry::default()
        .with(env_filter(logging))
        .with(fmt_layer(logging))
        .with(otel_layer)
        .try_init();

    tracing::info!(
        service_name = %service_name,
        endpoint = %endpoint,
        "OpenTelemetry initialized"
    );

    TelemetryGuard {
        provider: Some(provider),
    }
}
