//! Bounded Buffers
//!
//! Provides the two bounded containers of the ingestion pipeline: a byte
//! accumulator that truncates from the front on overflow, and a fixed
//! capacity history ring that evicts its oldest entry when full.

mod buffer;
mod bytes;

pub use buffer::{HistoryRing, SharedHistory, DEFAULT_CAPACITY};
pub use bytes::{ByteBuffer, DEFAULT_BYTE_LIMIT};
