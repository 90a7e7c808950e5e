//! Serial Channel Seams
//!
//! The ingestion worker only sees [`SerialConnector`] and [`SerialChannel`];
//! the `serialport` backed implementation lives here as well.

use crate::connection::ConnectionConfig;
use crate::error::{ChannelError, ConnectError};
use std::io::{ErrorKind, Read};
use tracing::{debug, info, warn};

/// Scratch size for one read call
const READ_CHUNK: usize = 4096;

/// An open byte channel to the meter
pub trait SerialChannel: Send {
    /// Return whatever bytes arrived, empty if none within the read timeout
    fn read_available(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Release the underlying device
    fn close(&mut self);
}

/// Opens channels from validated parameters
pub trait SerialConnector: Send + Sync {
    /// Open a channel, validating `config` first
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectError>;
}

/// Names of the serial ports present on this machine, sorted
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => {
            let mut names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
            names.sort();
            names
        }
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Connector for physical serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortConnector;

impl SerialConnector for SerialPortConnector {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectError> {
        config.validate()?;
        info!(
            "Opening serial port {} at {} baud, {} data bits, parity {}",
            config.port,
            config.baud_rate,
            u8::from(config.data_bits),
            config.parity
        );

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|e| ConnectError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialPortChannel {
            name: config.port.clone(),
            port: Some(port),
            scratch: vec![0u8; READ_CHUNK],
        }))
    }
}

/// Channel backed by an open `serialport` device
pub struct SerialPortChannel {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    scratch: Vec<u8>,
}

impl SerialChannel for SerialPortChannel {
    fn read_available(&mut self) -> Result<Vec<u8>, ChannelError> {
        let port = self.port.as_mut().ok_or(ChannelError::Closed)?;
        match port.read(&mut self.scratch) {
            Ok(n) => Ok(self.scratch[..n].to_vec()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.name);
        }
    }
}
