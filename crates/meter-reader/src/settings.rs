//! Reader configuration
//!
//! Layered with the `config` crate: built-in defaults, an optional TOML file,
//! `METER__*` environment variables, then command line flags.

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use meter_export::ExportFormat;
use meter_ingest::{SessionConfig, ThrottlePolicy, WorkerConfig};
use meter_protocol::{ConfigError, ConnectionConfig, DataBits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Command line flags, applied on top of file and environment settings
#[derive(Debug, Default, Parser)]
#[command(name = "meter-reader", version)]
#[command(about = "Read and display SML smart meter telegrams from a serial port", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serial port (e.g. /dev/ttyUSB0 or COM3)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits (6, 7 or 8)
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Parity (none, odd, even)
    #[arg(long)]
    pub parity: Option<String>,

    /// Display update interval, e.g. "5s"
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Throttle by elapsed time or by frame count
    #[arg(long, value_enum)]
    pub throttle: Option<ThrottleMode>,

    /// Write the history to this file on shutdown
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Export format (text or json)
    #[arg(long)]
    pub format: Option<ExportFormat>,

    /// Read from a built-in simulated meter instead of a serial port
    #[arg(long)]
    pub simulate: bool,

    /// List available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// JSON log output
    #[arg(long)]
    pub json_logs: bool,
}

/// Display throttling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleMode {
    /// Elapsed wall-clock time
    #[default]
    Time,
    /// Every Nth decoded frame
    Frames,
}

/// Serial line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    /// "none", "odd" or "even"
    pub parity: String,
    /// Read timeout in milliseconds (< 1000)
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            parity: "none".into(),
            read_timeout_ms: 100,
        }
    }
}

/// Ingestion and display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Display update interval, written as "<n>s"
    pub update_interval: String,
    pub throttle: ThrottleMode,
    /// Frames kept for export
    pub history_capacity: usize,
    pub buffer_size_limit_bytes: usize,
    pub poll_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            update_interval: "1s".into(),
            throttle: ThrottleMode::Time,
            history_capacity: 60,
            buffer_size_limit_bytes: 16 * 1024,
            poll_interval_ms: 20,
            tick_interval_ms: 100,
            stop_timeout_ms: 1000,
        }
    }
}

/// Export on shutdown
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub format: ExportFormat,
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Complete reader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub serial: SerialSettings,
    pub ingest: IngestSettings,
    pub export: ExportSettings,
    pub logging: LoggingSettings,
}

impl MeterConfig {
    /// Settings for the built-in simulated meter
    pub fn simulated() -> Self {
        Self {
            serial: SerialSettings {
                port: "SIM".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load defaults, then `path` (if given), then `METER__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&MeterConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix("METER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Overlay command line flags
    pub fn apply_cli(&mut self, cli: &Cli) {
        if cli.simulate && self.serial.port.is_empty() {
            self.serial.port = "SIM".into();
        }
        if let Some(port) = &cli.port {
            self.serial.port = port.clone();
        }
        if let Some(baud) = cli.baud {
            self.serial.baud_rate = baud;
        }
        if let Some(bits) = cli.data_bits {
            self.serial.data_bits = bits;
        }
        if let Some(parity) = &cli.parity {
            self.serial.parity = parity.clone();
        }
        if let Some(interval) = &cli.interval {
            self.ingest.update_interval = interval.clone();
        }
        if let Some(mode) = cli.throttle {
            self.ingest.throttle = mode;
        }
        if let Some(path) = &cli.export {
            self.export.path = Some(path.clone());
        }
        if let Some(format) = cli.format {
            self.export.format = format;
        }
        if cli.verbose {
            self.logging.level = "debug".into();
        }
        if cli.json_logs {
            self.logging.json = true;
        }
    }

    /// Update interval in whole units, falling back to 1 when unparsable
    pub fn update_interval(&self) -> u64 {
        parse_interval(&self.ingest.update_interval).unwrap_or_else(|| {
            warn!(
                "Invalid update interval '{}', using 1s",
                self.ingest.update_interval
            );
            1
        })
    }

    /// Validated serial connection parameters
    pub fn connection(&self) -> Result<ConnectionConfig, ConfigError> {
        let connection = ConnectionConfig {
            port: self.serial.port.trim().to_string(),
            baud_rate: self.serial.baud_rate,
            data_bits: DataBits::try_from(self.serial.data_bits)?,
            parity: self.serial.parity.parse()?,
            timeout: Duration::from_millis(self.serial.read_timeout_ms),
        };
        connection.validate()?;
        Ok(connection)
    }

    /// Everything the ingestion session needs
    pub fn session(&self) -> Result<SessionConfig, ConfigError> {
        if self.ingest.history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "history_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.ingest.buffer_size_limit_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size_limit_bytes",
                reason: "must be greater than zero".into(),
            });
        }

        // The worker notices a stop request after at most one read plus one poll sleep
        let worst_stop = self
            .serial
            .read_timeout_ms
            .saturating_add(self.ingest.poll_interval_ms);
        if self.ingest.stop_timeout_ms <= worst_stop {
            return Err(ConfigError::Invalid {
                field: "stop_timeout_ms",
                reason: format!(
                    "must exceed read_timeout_ms + poll_interval_ms ({} ms)",
                    worst_stop
                ),
            });
        }

        let interval = self.update_interval();
        let throttle = match self.ingest.throttle {
            ThrottleMode::Time => ThrottlePolicy::Elapsed(Duration::from_secs(interval)),
            ThrottleMode::Frames => ThrottlePolicy::EveryNthFrame(interval),
        };

        Ok(SessionConfig {
            connection: self.connection()?,
            worker: WorkerConfig {
                buffer_limit: self.ingest.buffer_size_limit_bytes,
                poll_interval: Duration::from_millis(self.ingest.poll_interval_ms),
                stop_timeout: Duration::from_millis(self.ingest.stop_timeout_ms),
            },
            throttle,
            history_capacity: self.ingest.history_capacity,
            tick_interval: Duration::from_millis(self.ingest.tick_interval_ms.max(1)),
        })
    }
}

/// Parse an interval written as `<digits>s`, e.g. `"15s"`. Zero is rejected.
pub fn parse_interval(text: &str) -> Option<u64> {
    let digits = text.strip_suffix('s')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}
