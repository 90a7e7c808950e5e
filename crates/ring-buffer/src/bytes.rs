//! Bounded Byte Accumulator

use tracing::trace;

/// Default byte limit (16 KiB, far above a typical SML telegram)
pub const DEFAULT_BYTE_LIMIT: usize = 16 * 1024;

/// Append-only byte buffer with a hard size ceiling.
///
/// When an append pushes the length past the limit only the most recent
/// `limit` bytes are kept.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    limit: usize,
    /// Bytes dropped by truncation since creation
    dropped_total: u64,
}

impl ByteBuffer {
    /// Create an empty buffer
    ///
    /// # Panics
    /// Panics if `limit` is zero.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "ByteBuffer limit must be > 0");
        Self {
            data: Vec::with_capacity(limit.min(4096)),
            limit,
            dropped_total: 0,
        }
    }

    /// Append bytes, returning how many of the oldest bytes were dropped
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if bytes.len() >= self.limit {
            let dropped = self.data.len() + bytes.len() - self.limit;
            self.data.clear();
            self.data.extend_from_slice(&bytes[bytes.len() - self.limit..]);
            self.dropped_total += dropped as u64;
            trace!(dropped, limit = self.limit, "Byte buffer truncated");
            return dropped;
        }

        self.data.extend_from_slice(bytes);
        let overflow = self.data.len().saturating_sub(self.limit);
        if overflow > 0 {
            self.data.drain(..overflow);
            self.dropped_total += overflow as u64;
            trace!(dropped = overflow, limit = self.limit, "Byte buffer truncated");
        }
        overflow
    }

    /// Drop all contents
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Keep only the newest `n` bytes
    pub fn retain_last(&mut self, n: usize) {
        let excess = self.data.len().saturating_sub(n);
        self.data.drain(..excess);
    }

    /// Current contents
    pub fn snapshot(&self) -> &[u8] {
        &self.data
    }

    /// Current length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Configured ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes dropped by truncation since creation
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BYTE_LIMIT)
    }
}
