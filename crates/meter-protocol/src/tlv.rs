//! SML Type-Length-Value Parser
//!
//! Each value starts with a TL byte: bit 7 flags a continuation TL byte,
//! bits 6..4 hold the type and bits 3..0 the length. For scalar types the
//! length counts the TL bytes themselves; for lists it is the element count.

use crate::error::DecodeError;

const TYPE_OCTET_STRING: u8 = 0x0;
const TYPE_BOOLEAN: u8 = 0x4;
const TYPE_SIGNED: u8 = 0x5;
const TYPE_UNSIGNED: u8 = 0x6;
const TYPE_LIST: u8 = 0x7;

/// Deepest list nesting accepted; real SML files stay well below this
pub(crate) const MAX_DEPTH: usize = 16;

/// A parsed SML value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmlValue {
    /// Octet string
    Bytes(Vec<u8>),
    /// Boolean
    Bool(bool),
    /// Signed integer (Integer8..Integer64)
    Int(i64),
    /// Unsigned integer (Unsigned8..Unsigned64)
    UInt(u64),
    /// Ordered list of values
    List(Vec<SmlValue>),
    /// Optional value not set (`0x01`)
    Absent,
    /// End-of-message marker (`0x00`)
    EndOfMessage,
}

impl SmlValue {
    /// Borrow list elements, if this is a list
    pub fn as_list(&self) -> Option<&[SmlValue]> {
        match self {
            SmlValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow octet string bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SmlValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Numeric value as unsigned, accepting non-negative signed integers
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            SmlValue::UInt(v) => Some(v),
            SmlValue::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Numeric value as signed, accepting unsigned integers that fit
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            SmlValue::Int(v) => Some(v),
            SmlValue::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }
}

/// Cursor over an unescaped SML payload
pub(crate) struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read the next value, recursing into lists
    pub(crate) fn read_value(&mut self) -> Result<SmlValue, DecodeError> {
        self.read_nested(0)
    }

    fn read_nested(&mut self, depth: usize) -> Result<SmlValue, DecodeError> {
        let offset = self.pos;
        let first = self.next_byte()?;

        match first {
            0x00 => return Ok(SmlValue::EndOfMessage),
            0x01 => return Ok(SmlValue::Absent),
            _ => {}
        }

        let kind = (first >> 4) & 0x07;
        let mut len = (first & 0x0F) as usize;
        let mut tl_len = 1usize;
        let mut tl = first;
        while tl & 0x80 != 0 {
            tl = self.next_byte()?;
            if (tl >> 4) & 0x07 != 0 {
                return Err(DecodeError::UnexpectedType { tl, offset });
            }
            len = (len << 4) | (tl & 0x0F) as usize;
            tl_len += 1;
        }

        if kind == TYPE_LIST {
            if depth >= MAX_DEPTH {
                return Err(DecodeError::NestingTooDeep { offset });
            }
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(self.read_nested(depth + 1)?);
            }
            return Ok(SmlValue::List(items));
        }

        let data_len = len
            .checked_sub(tl_len)
            .ok_or(DecodeError::UnexpectedType { tl: first, offset })?;
        let data = self.take(data_len)?;

        match kind {
            TYPE_OCTET_STRING => Ok(SmlValue::Bytes(data.to_vec())),
            TYPE_BOOLEAN => match data {
                [b] => Ok(SmlValue::Bool(*b != 0)),
                _ => Err(DecodeError::UnexpectedType { tl: first, offset }),
            },
            TYPE_SIGNED if (1..=8).contains(&data.len()) => Ok(SmlValue::Int(be_signed(data))),
            TYPE_UNSIGNED if (1..=8).contains(&data.len()) => {
                Ok(SmlValue::UInt(be_unsigned(data)))
            }
            _ => Err(DecodeError::UnexpectedType { tl: first, offset }),
        }
    }
}

fn be_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn be_signed(bytes: &[u8]) -> i64 {
    let raw = be_unsigned(bytes);
    let shift = 64 - 8 * bytes.len() as u32;
    // Sign-extend from the top bit of the encoded width
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_values() {
        let mut reader = TlvReader::new(&[0x62, 0x1E, 0x63, 0x07, 0x01]);
        assert_eq!(reader.read_value().unwrap(), SmlValue::UInt(0x1E));
        assert_eq!(reader.read_value().unwrap(), SmlValue::UInt(0x0701));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_signed_sign_extension() {
        // Integer8 0xFF = -1, Integer16 0xFFFE = -2
        let mut reader = TlvReader::new(&[0x52, 0xFF, 0x53, 0xFF, 0xFE]);
        assert_eq!(reader.read_value().unwrap(), SmlValue::Int(-1));
        assert_eq!(reader.read_value().unwrap(), SmlValue::Int(-2));
    }

    #[test]
    fn test_list_and_markers() {
        // List of 3: octet string "AB", absent, boolean true
        let mut reader = TlvReader::new(&[0x73, 0x03, b'A', b'B', 0x01, 0x42, 0x01, 0x00]);
        let value = reader.read_value().unwrap();
        assert_eq!(
            value,
            SmlValue::List(vec![
                SmlValue::Bytes(b"AB".to_vec()),
                SmlValue::Absent,
                SmlValue::Bool(true),
            ])
        );
        assert_eq!(reader.read_value().unwrap(), SmlValue::EndOfMessage);
    }

    #[test]
    fn test_multi_byte_length() {
        // Octet string of 17 data bytes: TL = 0x81 0x03 -> len 0x13 (19) incl. 2 TL bytes
        let mut bytes = vec![0x81, 0x03];
        bytes.extend_from_slice(&[0xAA; 17]);
        let mut reader = TlvReader::new(&bytes);
        assert_eq!(reader.read_value().unwrap(), SmlValue::Bytes(vec![0xAA; 17]));
    }

    #[test]
    fn test_nesting_limit() {
        // MAX_DEPTH nested single-element lists around an Unsigned8 still parse
        let mut ok = vec![0x71; MAX_DEPTH];
        ok.extend_from_slice(&[0x62, 0x07]);
        let mut value = TlvReader::new(&ok).read_value().unwrap();
        for _ in 0..MAX_DEPTH {
            value = value.as_list().unwrap()[0].clone();
        }
        assert_eq!(value, SmlValue::UInt(7));

        let deep = vec![0x71; 100_000];
        assert_eq!(
            TlvReader::new(&deep).read_value(),
            Err(DecodeError::NestingTooDeep { offset: MAX_DEPTH })
        );
    }

    #[test]
    fn test_truncated_value() {
        let mut reader = TlvReader::new(&[0x65, 0x00, 0x01]);
        assert!(matches!(
            reader.read_value(),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
