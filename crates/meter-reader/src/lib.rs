//! Smart Meter Reader
//!
//! Configuration, logging setup and console presentation for the
//! `meter-reader` binary.

pub mod settings;
pub mod presenter;

pub use settings::{parse_interval, Cli, MeterConfig, ThrottleMode};
pub use presenter::ConsolePresenter;

use anyhow::anyhow;
use settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))
}
