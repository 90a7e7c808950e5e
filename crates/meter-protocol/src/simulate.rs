//! Simulated Meter
//!
//! Encodes SML frames and serves them through the [`SerialChannel`] seam so
//! the pipeline can run without hardware.

use crate::channel::{SerialChannel, SerialConnector};
use crate::connection::ConnectionConfig;
use crate::crc::crc16_x25;
use crate::entry::EntryValue;
use crate::error::{ChannelError, ConnectError};
use crate::escape::{END_MARKER, ESCAPE, START};
use crate::message::{CLOSE_RESPONSE, GET_LIST_RESPONSE, OPEN_RESPONSE};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One value entry for [`SmlFrameBuilder`]
#[derive(Debug, Clone)]
pub struct Reading {
    /// OBIS object name
    pub obis: [u8; 6],
    /// DLMS unit code
    pub unit: Option<u8>,
    /// Power-of-ten scaler
    pub scaler: Option<i8>,
    /// Raw value
    pub value: EntryValue,
}

impl Reading {
    /// Numeric reading with unit and scaler
    pub fn new(obis: [u8; 6], unit: u8, scaler: i8, value: u64) -> Self {
        Self {
            obis,
            unit: Some(unit),
            scaler: Some(scaler),
            value: EntryValue::UInt(value),
        }
    }

    /// Octet string reading without unit or scaler
    pub fn text(obis: [u8; 6], value: &[u8]) -> Self {
        Self {
            obis,
            unit: None,
            scaler: None,
            value: EntryValue::Bytes(value.to_vec()),
        }
    }
}

/// Encoder for complete SML transport frames
#[derive(Debug, Clone)]
pub struct SmlFrameBuilder {
    server_id: Vec<u8>,
    entries: Vec<Vec<u8>>,
    with_get_list: bool,
}

impl SmlFrameBuilder {
    /// Start a frame for the given server id
    pub fn new(server_id: Vec<u8>) -> Self {
        Self {
            server_id,
            entries: Vec::new(),
            with_get_list: true,
        }
    }

    /// Append a value entry
    pub fn reading(mut self, reading: Reading) -> Self {
        let mut entry = list_header(7);
        entry.extend(octets(&reading.obis));
        entry.push(ABSENT); // status
        entry.push(ABSENT); // valTime
        match reading.unit {
            Some(unit) => entry.extend([0x62, unit]),
            None => entry.push(ABSENT),
        }
        match reading.scaler {
            Some(scaler) => entry.extend([0x52, scaler as u8]),
            None => entry.push(ABSENT),
        }
        entry.extend(value(&reading.value));
        entry.push(ABSENT); // valueSignature
        self.entries.push(entry);
        self
    }

    /// Append a pre-encoded entry, used to exercise malformed input
    pub fn raw_entry(mut self, encoded: Vec<u8>) -> Self {
        self.entries.push(encoded);
        self
    }

    /// Emit only open and close messages
    pub fn without_get_list(mut self) -> Self {
        self.with_get_list = false;
        self
    }

    /// Encode the transport frame
    pub fn build(&self) -> Vec<u8> {
        let mut payload = Vec::new();

        let mut open = list_header(6);
        open.push(ABSENT);
        open.push(ABSENT);
        open.extend(octets(b"req-file"));
        open.extend(octets(&self.server_id));
        open.push(ABSENT);
        open.push(ABSENT);
        payload.extend(message(1, OPEN_RESPONSE, open));

        if self.with_get_list {
            let mut body = list_header(7);
            body.push(ABSENT); // clientId
            body.extend(octets(&self.server_id));
            body.push(ABSENT); // listName
            body.push(ABSENT); // actSensorTime
            body.extend(list_header(self.entries.len()));
            for entry in &self.entries {
                body.extend_from_slice(entry);
            }
            body.push(ABSENT); // listSignature
            body.push(ABSENT); // actGatewayTime
            payload.extend(message(2, GET_LIST_RESPONSE, body));
        }

        let mut close = list_header(1);
        close.push(ABSENT);
        payload.extend(message(3, CLOSE_RESPONSE, close));

        let mut frame = Vec::with_capacity(payload.len() + 24);
        frame.extend_from_slice(&ESCAPE);
        frame.extend_from_slice(&START);
        for chunk in payload.chunks(4) {
            frame.extend_from_slice(chunk);
            if chunk == ESCAPE {
                frame.extend_from_slice(&ESCAPE);
            }
        }
        let padding = (4 - frame.len() % 4) % 4;
        frame.resize(frame.len() + padding, 0x00);
        frame.extend_from_slice(&ESCAPE);
        frame.push(END_MARKER);
        frame.push(padding as u8);
        let crc = crc16_x25(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }
}

const ABSENT: u8 = 0x01;
const END_OF_MESSAGE: u8 = 0x00;

fn list_header(len: usize) -> Vec<u8> {
    if len < 16 {
        vec![0x70 | len as u8]
    } else {
        vec![0xF0 | ((len >> 4) & 0x0F) as u8, (len & 0x0F) as u8]
    }
}

fn octets(bytes: &[u8]) -> Vec<u8> {
    let mut out = if bytes.len() + 1 < 16 {
        vec![(bytes.len() + 1) as u8]
    } else {
        let total = bytes.len() + 2;
        vec![0x80 | ((total >> 4) & 0x0F) as u8, (total & 0x0F) as u8]
    };
    out.extend_from_slice(bytes);
    out
}

fn value(value: &EntryValue) -> Vec<u8> {
    match value {
        EntryValue::Int(v) => {
            let mut out = vec![0x59];
            out.extend_from_slice(&v.to_be_bytes());
            out
        }
        EntryValue::UInt(v) => {
            let mut out = vec![0x69];
            out.extend_from_slice(&v.to_be_bytes());
            out
        }
        EntryValue::Bool(b) => vec![0x42, *b as u8],
        EntryValue::Bytes(b) => octets(b),
    }
}

fn message(transaction: u8, tag: u32, body: Vec<u8>) -> Vec<u8> {
    let mut out = list_header(6);
    out.extend(octets(&[transaction]));
    out.extend([0x62, 0x00]); // groupNo
    out.extend([0x62, 0x00]); // abortOnError
    out.extend(list_header(2));
    out.extend([0x63, (tag >> 8) as u8, tag as u8]);
    out.extend(body);
    out.extend([0x63, 0x00, 0x00]); // message crc, not checked
    out.push(END_OF_MESSAGE);
    out
}

/// Channel that emits a synthetic meter telegram at a fixed interval
pub struct SimulatedChannel {
    interval: Duration,
    read_timeout: Duration,
    chunk_size: usize,
    next_frame: Instant,
    outbox: VecDeque<u8>,
    energy_tenth_wh: u64,
    frames_sent: u64,
    closed: bool,
}

impl SimulatedChannel {
    /// Create a simulated meter sending one frame per `interval`
    pub fn new(interval: Duration, read_timeout: Duration) -> Self {
        Self {
            interval,
            read_timeout,
            chunk_size: 64,
            next_frame: Instant::now(),
            outbox: VecDeque::new(),
            energy_tenth_wh: 12_345_678,
            frames_sent: 0,
            closed: false,
        }
    }

    fn generate_frame(&mut self) -> Vec<u8> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        // Deterministic pseudo-random load between 150 W and 3150 W
        let mut hasher = DefaultHasher::new();
        self.frames_sent.hash(&mut hasher);
        let power_w = 150 + hasher.finish() % 3000;

        let elapsed_h = self.interval.as_secs_f64() / 3600.0;
        self.energy_tenth_wh += (power_w as f64 * elapsed_h * 10.0).round() as u64;
        self.frames_sent += 1;

        SmlFrameBuilder::new(b"\x0aSIM0000001".to_vec())
            .reading(Reading::text([129, 129, 199, 130, 3, 255], b"SIM"))
            .reading(Reading::text([1, 0, 0, 2, 0, 0], b"1.0.3"))
            .reading(Reading::new([1, 0, 1, 8, 0, 255], 30, -1, self.energy_tenth_wh))
            .reading(Reading::new([1, 0, 2, 8, 0, 255], 30, -1, 0))
            .reading(Reading::new([1, 0, 16, 7, 0, 255], 27, 0, power_w))
            .build()
    }
}

impl SerialChannel for SimulatedChannel {
    fn read_available(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        if self.outbox.is_empty() {
            let now = Instant::now();
            if now < self.next_frame {
                std::thread::sleep((self.next_frame - now).min(self.read_timeout));
                return Ok(Vec::new());
            }
            let frame = self.generate_frame();
            debug!(len = frame.len(), "Simulated meter emitting frame");
            self.outbox.extend(frame);
            self.next_frame = now + self.interval;
        }

        let n = self.chunk_size.min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Connector handing out [`SimulatedChannel`]s
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    interval: Duration,
}

impl SimulatedConnector {
    /// Meter sends one telegram per `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl SerialConnector for SimulatedConnector {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectError> {
        config.validate()?;
        info!(port = %config.port, "Opening simulated meter");
        Ok(Box::new(SimulatedChannel::new(self.interval, config.timeout)))
    }
}
