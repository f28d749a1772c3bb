//! Logging bootstrap and metric helpers shared by the session crates.

mod config;
mod context;
mod metrics;
mod tracing_init;

use anyhow::Result;

pub use config::TelemetryConfig;
pub use context::TelemetryLabels;
pub use metrics::{record_counter, record_histogram};
pub use tracing_init::{init_telemetry, telemetry_installed};

/// Installs the shared subscriber configured from the process environment.
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
