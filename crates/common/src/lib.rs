pub mod config;
pub mod logging;
pub mod telemetry;
pub mod wait;

pub use config::{Environment, env_or};
pub use logging::setup_logging;
pub use telemetry::TelemetryGuard;
