//! Worker-to-consumer events and the queue that carries them

use chrono::{DateTime, Local};
use meter_protocol::DecodedFrame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Something the ingestion worker reports to the consumer loop
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame was decoded
    FrameReceived {
        /// Monotonic frame counter, starting at 1
        sequence: u64,
        /// Wall-clock capture time
        received_at: DateTime<Local>,
        /// Number of decoded measurements
        entry_count: usize,
    },
    /// Decoded frame for history and (throttled) display
    DisplayUpdate {
        /// Same sequence as the preceding `FrameReceived`
        sequence: u64,
        /// Wall-clock capture time
        received_at: DateTime<Local>,
        /// Monotonic capture time, used for throttling
        captured: Instant,
        /// The decoded frame
        frame: Arc<DecodedFrame>,
    },
    /// Non-fatal problem (decode failures, skipped entries)
    Warning(String),
    /// Fatal problem, the worker has stopped or failed to start
    Error(String),
    /// Worker left the poll loop after a stop request
    Stopped,
}

/// FIFO event channel between the worker thread and the consumer loop.
///
/// `push` never blocks on the consumer beyond the short critical section;
/// the queue is unbounded because meter telegrams arrive on the order of
/// seconds.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event
    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
    }

    /// Remove and return every queued event in push order
    pub fn drain_all(&self) -> Vec<Event> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
