//! Meter Protocol Error Types

use thiserror::Error;

/// Invalid or missing connection parameter, detected before any I/O
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No port selected
    #[error("No serial port selected or available")]
    MissingPort,

    /// Baud rate outside the supported set
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Data bits outside 6..=8
    #[error("Unsupported data bits: {0}")]
    UnsupportedDataBits(u8),

    /// Unknown parity name
    #[error("Unknown parity: {0}")]
    UnknownParity(String),

    /// Field value rejected by validation
    #[error("Invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// The serial channel could not be opened
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Parameters rejected before the open attempt
    #[error("Invalid connection parameters: {0}")]
    Config(#[from] ConfigError),

    /// The port exists but could not be opened
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
}

/// Read failure on an already open channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying I/O failure
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel was closed before the read
    #[error("Serial channel is closed")]
    Closed,
}

/// A malformed or partial frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame checksum mismatch
    #[error("CRC mismatch: frame carries {expected:04X}, computed {actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// Ran out of bytes inside a value
    #[error("Frame truncated at offset {offset}")]
    Truncated { offset: usize },

    /// A type-length field that the parser cannot interpret
    #[error("Unexpected type-length byte {tl:02X} at offset {offset}")]
    UnexpectedType { tl: u8, offset: usize },

    /// Lists nested deeper than the parser accepts
    #[error("List nesting too deep at offset {offset}")]
    NestingTooDeep { offset: usize },

    /// Frame decoded but carried no measurement list
    #[error("Incomplete SML file: {0}")]
    Incomplete(String),

    /// The decoder handed out a frame too early; more bytes are required
    #[error("Frame needs more data: {0}")]
    NeedMoreData(String),
}

impl DecodeError {
    /// Whether the decoder already dropped the offending bytes.
    ///
    /// When `false` the caller keeps its pending bytes so that the frame can
    /// be retried once more data arrives.
    pub fn frame_consumed(&self) -> bool {
        !matches!(self, DecodeError::NeedMoreData(_))
    }
}

/// A single measurement entry that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// Entry is not a list of the expected arity
    #[error("Entry {index}: expected a 7-element list")]
    Shape { index: usize },

    /// Object name is not a 6-byte OBIS code
    #[error("Entry {index}: invalid OBIS object name ({len} bytes)")]
    ObisLength { index: usize, len: usize },

    /// Value field missing
    #[error("Entry {index} ({obis}): no value")]
    MissingValue { index: usize, obis: String },

    /// Field had a type the entry cannot hold
    #[error("Entry {index}: field {field} has unexpected type")]
    FieldType { index: usize, field: &'static str },
}
