//! Smart Meter Protocol Implementation
//!
//! This crate provides SML (Smart Message Language) frame detection and
//! decoding for electricity meters with an optical or serial interface,
//! plus the serial channel seams used by the ingestion pipeline.

mod channel;
mod connection;
mod crc;
mod decoder;
mod entry;
mod error;
mod obis;
mod simulate;
mod sml;
mod tlv;

pub use channel::{
    available_ports, SerialChannel, SerialConnector, SerialPortChannel, SerialPortConnector,
};
pub use connection::{ConnectionConfig, DataBits, Parity, SUPPORTED_BAUD_RATES};
pub use crc::{crc16_kermit, crc16_x25};
pub use decoder::{FrameDecoder, RawFrame};
pub use entry::{DecodedFrame, EntryValue, MeterEntry};
pub use error::{ChannelError, ConfigError, ConnectError, DecodeError, EntryError};
pub use obis::{unit_symbol, ObisCode, HIGHLIGHTED_CODES};
pub use simulate::{Reading, SimulatedChannel, SimulatedConnector, SmlFrameBuilder};
pub use sml::{SmlFrame, SmlStreamReader};
pub use tlv::SmlValue;

/// SML transport escape sequences
pub mod escape {
    /// Four escape bytes that open every transport sequence
    pub const ESCAPE: [u8; 4] = [0x1B, 0x1B, 0x1B, 0x1B];
    /// Version 1 start sequence following the escape
    pub const START: [u8; 4] = [0x01, 0x01, 0x01, 0x01];
    /// Marker byte of the end sequence following the escape
    pub const END_MARKER: u8 = 0x1A;
}

/// SML message body tags
pub mod message {
    /// Open response
    pub const OPEN_RESPONSE: u32 = 0x0101;
    /// Close response
    pub const CLOSE_RESPONSE: u32 = 0x0201;
    /// Get list response (carries the measurement values)
    pub const GET_LIST_RESPONSE: u32 = 0x0701;
}
