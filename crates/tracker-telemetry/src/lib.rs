//! # tracker-telemetry
//!
//! Process-wide `tracing` subscriber setup and the Prometheus recorder that
//! backs the `/metrics` route.

#![deny(unsafe_code)]

pub mod metrics;

pub use metrics::{install_recorder, render, PrometheusHandle};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level filter directive. Overridden by the `RUST_LOG` env var.
    pub level: String,
    /// Per-module level overrides (e.g. `"tracker_server=debug"`).
    pub module_levels: Vec<(String, String)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
    #[error("metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl TelemetryConfig {
    /// The filter directive string built from the level and module overrides.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        directive
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directive = self.filter_directive();
        EnvFilter::try_new(&directive).map_err(|source| TelemetryError::Filter { directive, source })
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}
