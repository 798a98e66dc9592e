use crate::config::Environment;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter from `RUST_LOG`, or `default_directive` when it is unset or invalid.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global tracing subscriber.
///
/// Pretty, colored output in development and JSON lines in production,
/// filtered by `RUST_LOG` (default "info"). An OpenTelemetry layer is
/// stacked on top; it exports only once a global tracer provider exists
/// (see [`crate::TelemetryGuard`]).
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_logging(environment: Environment) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(tracing_opentelemetry::layer());

    match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init()?,
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init()?,
    }

    tracing::debug!(environment = environment.as_str(), "logging initialized");
    Ok(())
}
