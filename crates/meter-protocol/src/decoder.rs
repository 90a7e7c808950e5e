//! Frame decoder seam used by the ingestion worker

use crate::entry::DecodedFrame;
use crate::error::DecodeError;

/// A complete frame extracted from the byte stream, not yet decoded
pub trait RawFrame: Send {
    /// Decode the frame into measurements
    fn decode(&self) -> Result<DecodedFrame, DecodeError>;

    /// Size of the frame on the wire
    fn wire_len(&self) -> usize;
}

/// Incremental frame detector over an appended byte stream
pub trait FrameDecoder: Send {
    /// Frame handle produced by this decoder
    type Frame: RawFrame;

    /// Append newly received bytes
    fn add_bytes(&mut self, bytes: &[u8]);

    /// Remove and return the next complete frame, if one is available
    fn try_extract_frame(&mut self) -> Option<Self::Frame>;

    /// Bytes held back waiting for a frame boundary
    fn pending_len(&self) -> usize;

    /// Drop all pending bytes
    fn reset(&mut self);
}
