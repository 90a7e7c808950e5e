//! Decoded Measurements
//!
//! A decoded frame is an ordered list of OBIS-labelled entries. The
//! ingestion pipeline passes these through untouched; only the presentation
//! and export layers call the scaling and formatting helpers below.

use crate::error::EntryError;
use crate::obis::{unit_symbol, ObisCode};
use serde::{Deserialize, Serialize};

/// Raw value carried by an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    /// Signed counter or reading
    Int(i64),
    /// Unsigned counter or reading
    UInt(u64),
    /// Boolean flag
    Bool(bool),
    /// Octet string (serial numbers, firmware versions, public keys)
    Bytes(Vec<u8>),
}

impl EntryValue {
    fn as_f64(&self) -> Option<f64> {
        match *self {
            EntryValue::Int(v) => Some(v as f64),
            EntryValue::UInt(v) => Some(v as f64),
            _ => None,
        }
    }
}

/// One labelled measurement within a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterEntry {
    /// OBIS object name
    pub obis: ObisCode,
    /// Raw value as transmitted
    pub value: EntryValue,
    /// Power-of-ten scaler, if transmitted
    pub scaler: Option<i8>,
    /// DLMS unit code, if transmitted
    pub unit: Option<u8>,
    /// Meter status word, if transmitted
    pub status: Option<u64>,
}

impl MeterEntry {
    /// Short OBIS label, e.g. `1.8.0`
    pub fn label(&self) -> String {
        self.obis.short()
    }

    /// Unit symbol, empty when absent or unknown
    pub fn unit_symbol(&self) -> &'static str {
        self.unit.and_then(unit_symbol).unwrap_or("")
    }

    /// `value * 10^scaler` for numeric values
    pub fn scaled_value(&self) -> Option<f64> {
        let scaler = self.scaler.unwrap_or(0) as i32;
        self.value.as_f64().map(|v| v * 10f64.powi(scaler))
    }

    /// Human readable value.
    ///
    /// Negative scalers yield a two-decimal fixed point rendering; integers
    /// with a non-negative scaler stay integral. Octet strings are shown as
    /// text when printable, otherwise as hex.
    pub fn display_value(&self) -> String {
        let scaler = self.scaler.unwrap_or(0);
        match &self.value {
            EntryValue::Int(v) if scaler >= 0 => scale_int(*v as i128, scaler),
            EntryValue::UInt(v) if scaler >= 0 => scale_int(*v as i128, scaler),
            EntryValue::Int(_) | EntryValue::UInt(_) => self
                .scaled_value()
                .map(|v| format!("{:.2}", v))
                .unwrap_or_default(),
            EntryValue::Bool(b) => b.to_string(),
            EntryValue::Bytes(bytes) => display_bytes(bytes),
        }
    }
}

fn scale_int(value: i128, scaler: i8) -> String {
    let factor = 10i128.checked_pow(scaler as u32);
    match factor.and_then(|f| value.checked_mul(f)) {
        Some(scaled) => scaled.to_string(),
        None => format!("{}e{}", value, scaler),
    }
}

fn display_bytes(bytes: &[u8]) -> String {
    let printable = !bytes.is_empty()
        && bytes
            .iter()
            .all(|b| b.is_ascii_graphic() || *b == b' ');
    if printable {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// A fully decoded frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Server (meter) identifier, hex encoded
    pub server_id: Option<String>,
    /// Measurements in transmission order
    pub entries: Vec<MeterEntry>,
    /// Entries that could not be decoded
    #[serde(skip)]
    pub skipped: Vec<EntryError>,
}

impl DecodedFrame {
    /// Number of decoded measurements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no measurement was decoded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by its short OBIS label
    pub fn find(&self, label: &str) -> Option<&MeterEntry> {
        self.entries.iter().find(|e| e.label() == label)
    }
}
