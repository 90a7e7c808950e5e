//! Smart Meter Reader - Main Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use meter_export::{export_to_file, ExportError};
use meter_ingest::{MeterSession, TickOutcome};
use meter_protocol::{
    available_ports, SerialConnector, SerialPortConnector, SimulatedConnector, SmlStreamReader,
};
use meter_reader::{init_logging, Cli, ConsolePresenter, MeterConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        let ports = available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut config =
        MeterConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_cli(&cli);
    init_logging(&config.logging)?;

    info!("=== Smart Meter Reader v{} ===", env!("CARGO_PKG_VERSION"));
    let session_config = config.session().context("Invalid serial configuration")?;

    let connector: Arc<dyn SerialConnector> = if cli.simulate {
        info!("Using simulated meter");
        Arc::new(SimulatedConnector::new(Duration::from_secs(1)))
    } else {
        Arc::new(SerialPortConnector)
    };

    let mut session: MeterSession<SmlStreamReader> = MeterSession::new(connector, session_config);
    let mut consumer = session.consumer(ConsolePresenter::stdout());
    session.connect().context("Failed to start meter reader")?;

    match consumer.run(shutdown_signal()).await {
        TickOutcome::Halt => warn!("Reader stopped, reconnect required"),
        TickOutcome::Continue => info!("Shutdown requested"),
    }

    // The history is still intact, so export even when the worker hangs
    if let Err(e) = session.disconnect() {
        error!("Failed to stop ingestion worker: {}", e);
    }
    consumer.tick();

    if let Some(path) = &config.export.path {
        match export_to_file(session.history(), path, config.export.format) {
            Ok(count) => info!("Saved {} observations to {}", count, path.display()),
            Err(ExportError::NoData) => warn!("No data available to save"),
            Err(e) => return Err(e).context("Failed to export history"),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
