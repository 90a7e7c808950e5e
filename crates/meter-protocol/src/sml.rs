//! SML Transport Framing and Message Decoding
//!
//! A transport frame is `ESC 01 01 01 01 <payload> ESC 1A pp c1 c2`, where
//! `ESC` is four `0x1B` bytes, `pp` the number of fill bytes before the end
//! sequence and `c1 c2` a CRC-16 over everything before them. Escape
//! sequences inside the payload are doubled on 4-byte boundaries.

use crate::crc::{crc16_kermit, crc16_x25};
use crate::decoder::{FrameDecoder, RawFrame};
use crate::entry::{DecodedFrame, EntryValue, MeterEntry};
use crate::error::{DecodeError, EntryError};
use crate::escape::{END_MARKER, ESCAPE, START};
use crate::message::GET_LIST_RESPONSE;
use crate::obis::ObisCode;
use crate::tlv::{SmlValue, TlvReader};
use tracing::{debug, trace, warn};

/// Start sequence plus end sequence
const MIN_FRAME_LEN: usize = 16;

/// Incremental SML frame detector
#[derive(Debug, Default)]
pub struct SmlStreamReader {
    pending: Vec<u8>,
}

impl SmlStreamReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the first start sequence
    fn find_start(&self) -> Option<usize> {
        self.pending
            .windows(8)
            .position(|w| w[..4] == ESCAPE && w[4..] == START)
    }
}

impl FrameDecoder for SmlStreamReader {
    type Frame = SmlFrame;

    fn add_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn try_extract_frame(&mut self) -> Option<SmlFrame> {
        'search: loop {
            let Some(start) = self.find_start() else {
                // Keep a possible partial start sequence at the tail
                let keep = self.pending.len().min(7);
                let drop = self.pending.len() - keep;
                if drop > 0 {
                    trace!(dropped = drop, "Discarding bytes outside any SML frame");
                    self.pending.drain(..drop);
                }
                return None;
            };
            if start > 0 {
                trace!(dropped = start, "Discarding bytes before SML start sequence");
                self.pending.drain(..start);
            }

            let mut i = 8;
            while i + 4 <= self.pending.len() {
                if self.pending[i..i + 4] != ESCAPE {
                    i += 4;
                    continue;
                }
                if i + 8 > self.pending.len() {
                    return None;
                }
                let next = &self.pending[i + 4..i + 8];
                if next == ESCAPE {
                    i += 8;
                } else if next[0] == END_MARKER {
                    let frame: Vec<u8> = self.pending.drain(..i + 8).collect();
                    debug!(len = frame.len(), "SML frame extracted");
                    return Some(SmlFrame { bytes: frame });
                } else {
                    // A new start or an unknown escape aborts the current frame
                    debug!(offset = i, "SML frame interrupted by escape sequence, resyncing");
                    self.pending.drain(..i);
                    continue 'search;
                }
            }
            return None;
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

/// One complete SML transport frame, escape sequences included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmlFrame {
    bytes: Vec<u8>,
}

impl SmlFrame {
    /// Wrap raw frame bytes (start sequence through CRC)
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn verify_crc(&self) -> Result<(), DecodeError> {
        let split = self.bytes.len() - 2;
        let (body, tail) = self.bytes.split_at(split);
        let carried = [tail[0], tail[1]];
        let le = u16::from_le_bytes(carried);
        let be = u16::from_be_bytes(carried);

        let x25 = crc16_x25(body);
        if x25 == le || x25 == be {
            return Ok(());
        }
        let kermit = crc16_kermit(body);
        if kermit == le || kermit == be {
            return Ok(());
        }
        Err(DecodeError::Crc {
            expected: le,
            actual: x25,
        })
    }

    fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        let len = self.bytes.len();
        let padding = self.bytes[len - 3] as usize;
        let end = (len - 8)
            .checked_sub(padding)
            .filter(|&end| end >= 8)
            .ok_or(DecodeError::Truncated { offset: len - 3 })?;
        Ok(unescape(&self.bytes[8..end]))
    }
}

impl RawFrame for SmlFrame {
    fn decode(&self) -> Result<DecodedFrame, DecodeError> {
        if self.bytes.len() < MIN_FRAME_LEN {
            return Err(DecodeError::Truncated {
                offset: self.bytes.len(),
            });
        }
        self.verify_crc()?;
        let payload = self.payload()?;
        decode_messages(&payload)
    }

    fn wire_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Collapse doubled escape sequences on 4-byte boundaries
fn unescape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        if i + 8 <= payload.len() && payload[i..i + 4] == ESCAPE && payload[i + 4..i + 8] == ESCAPE
        {
            out.extend_from_slice(&ESCAPE);
            i += 8;
        } else {
            let end = (i + 4).min(payload.len());
            out.extend_from_slice(&payload[i..end]);
            i = end;
        }
    }
    out
}

fn decode_messages(payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let mut reader = TlvReader::new(payload);
    let mut frame = DecodedFrame::default();
    let mut messages = 0usize;
    let mut found_list = false;

    while !reader.is_at_end() {
        let message = match reader.read_value()? {
            SmlValue::List(items) => items,
            // Fill bytes between messages
            SmlValue::EndOfMessage | SmlValue::Absent => continue,
            other => {
                trace!(?other, "Ignoring stray value between SML messages");
                continue;
            }
        };
        messages += 1;

        let Some(body) = message.get(3).and_then(SmlValue::as_list) else {
            warn!(index = messages, "SML message without body");
            continue;
        };
        let tag = body.first().and_then(SmlValue::as_u64);
        if tag != Some(GET_LIST_RESPONSE as u64) {
            trace!(?tag, "Skipping SML message");
            continue;
        }
        let Some(response) = body.get(1).and_then(SmlValue::as_list) else {
            warn!("GetListResponse without content");
            continue;
        };
        found_list = true;
        decode_get_list(response, &mut frame);
    }

    if !found_list {
        return Err(DecodeError::Incomplete(format!(
            "{} message(s), no GetListResponse",
            messages
        )));
    }
    Ok(frame)
}

fn decode_get_list(response: &[SmlValue], frame: &mut DecodedFrame) {
    if frame.server_id.is_none() {
        frame.server_id = response
            .get(1)
            .and_then(SmlValue::as_bytes)
            .map(|b| b.iter().map(|x| format!("{:02x}", x)).collect());
    }

    let values = response.get(4).and_then(SmlValue::as_list).unwrap_or(&[]);
    for (index, raw) in values.iter().enumerate() {
        match decode_entry(index, raw) {
            Ok(entry) => frame.entries.push(entry),
            Err(err) => {
                warn!("Skipping SML entry: {}", err);
                frame.skipped.push(err);
            }
        }
    }
}

fn decode_entry(index: usize, raw: &SmlValue) -> Result<MeterEntry, EntryError> {
    let fields = raw
        .as_list()
        .filter(|f| f.len() == 7)
        .ok_or(EntryError::Shape { index })?;

    let name = fields[0].as_bytes().ok_or(EntryError::FieldType {
        index,
        field: "objName",
    })?;
    let obis = ObisCode::from_slice(name).ok_or(EntryError::ObisLength {
        index,
        len: name.len(),
    })?;

    let status = fields[1].as_u64();

    let unit = match &fields[3] {
        SmlValue::Absent => None,
        v => Some(
            v.as_u64()
                .and_then(|u| u8::try_from(u).ok())
                .ok_or(EntryError::FieldType { index, field: "unit" })?,
        ),
    };

    let scaler = match &fields[4] {
        SmlValue::Absent => None,
        v => Some(
            v.as_i64()
                .and_then(|s| i8::try_from(s).ok())
                .ok_or(EntryError::FieldType {
                    index,
                    field: "scaler",
                })?,
        ),
    };

    let value = match &fields[5] {
        SmlValue::Int(v) => EntryValue::Int(*v),
        SmlValue::UInt(v) => EntryValue::UInt(*v),
        SmlValue::Bool(b) => EntryValue::Bool(*b),
        SmlValue::Bytes(b) => EntryValue::Bytes(b.clone()),
        SmlValue::Absent | SmlValue::EndOfMessage => {
            return Err(EntryError::MissingValue {
                index,
                obis: obis.short(),
            })
        }
        SmlValue::List(_) => {
            return Err(EntryError::FieldType {
                index,
                field: "value",
            })
        }
    };

    Ok(MeterEntry {
        obis,
        value,
        scaler,
        unit,
        status,
    })
}
