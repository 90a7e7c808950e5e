//! Serial Ingestion Worker
//!
//! Owns the serial channel on a dedicated thread. Each poll reads whatever
//! bytes are available, feeds them to the frame decoder and publishes
//! decoded frames to the [`EventQueue`]. Cancellation is cooperative: the
//! loop checks a flag before and after every read, so the channel's read
//! timeout bounds how long a stop request can go unnoticed.

use crate::error::IngestError;
use crate::event::{Event, EventQueue};
use chrono::Local;
use meter_protocol::{ConnectionConfig, FrameDecoder, RawFrame, SerialChannel, SerialConnector};
use metrics::counter;
use ring_buffer::{ByteBuffer, DEFAULT_BYTE_LIMIT};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Lifecycle of an ingestion worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Connecting = 1,
    Polling = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Connecting,
            2 => WorkerState::Polling,
            3 => WorkerState::Stopping,
            4 => WorkerState::Stopped,
            _ => WorkerState::Failed,
        }
    }

    /// Worker thread has exited or never started
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Connecting => "connecting",
            WorkerState::Polling => "polling",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    state: AtomicU8,
    buffered_bytes: AtomicUsize,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

/// Shared, lock-free view of a worker's progress
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    inner: Arc<StatusInner>,
}

impl WorkerStatus {
    /// Fresh status in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        let previous = self.inner.state.swap(state as u8, Ordering::AcqRel);
        debug!(
            from = %WorkerState::from_u8(previous),
            to = %state,
            "Worker state changed"
        );
    }

    /// Whether the worker has finished (stopped or failed)
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Bytes currently held in the worker's byte buffer
    pub fn buffered_bytes(&self) -> usize {
        self.inner.buffered_bytes.load(Ordering::Acquire)
    }

    /// Frames decoded since the worker started
    pub fn frames_decoded(&self) -> u64 {
        self.inner.frames_decoded.load(Ordering::Acquire)
    }

    /// Frames that failed to decode since the worker started
    pub fn decode_errors(&self) -> u64 {
        self.inner.decode_errors.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.set_state(WorkerState::Idle);
        self.inner.buffered_bytes.store(0, Ordering::Release);
        self.inner.frames_decoded.store(0, Ordering::Release);
        self.inner.decode_errors.store(0, Ordering::Release);
    }
}

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Byte buffer ceiling
    pub buffer_limit: usize,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// How long `stop` waits for the thread to exit
    pub stop_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer_limit: DEFAULT_BYTE_LIMIT,
            poll_interval: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// One connection's worth of serial ingestion.
///
/// A worker is single-use: `start` moves the decoder onto the worker thread,
/// so reconnecting means building a new worker.
pub struct IngestionWorker<D: FrameDecoder + 'static> {
    connector: Arc<dyn SerialConnector>,
    decoder: Option<D>,
    queue: EventQueue,
    status: WorkerStatus,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    config: WorkerConfig,
}

impl<D: FrameDecoder + 'static> IngestionWorker<D> {
    /// Create an idle worker publishing into `queue` and reporting via `status`
    pub fn new(
        connector: Arc<dyn SerialConnector>,
        decoder: D,
        queue: EventQueue,
        status: WorkerStatus,
        config: WorkerConfig,
    ) -> Self {
        status.reset();
        Self {
            connector,
            decoder: Some(decoder),
            queue,
            status,
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
            config,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.status.state()
    }

    /// Status handle shared with the worker thread
    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    /// Validate `connection`, open the channel and launch the poll loop.
    ///
    /// Failures are returned synchronously and no thread is started. Connect
    /// failures are also published as an [`Event::Error`].
    pub fn start(&mut self, connection: &ConnectionConfig) -> Result<(), IngestError> {
        let state = self.state();
        if state != WorkerState::Idle {
            return Err(IngestError::AlreadyStarted(state));
        }
        let Some(decoder) = self.decoder.take() else {
            return Err(IngestError::AlreadyStarted(state));
        };

        if let Err(e) = connection.validate() {
            warn!("Rejected serial configuration: {}", e);
            self.decoder = Some(decoder);
            return Err(e.into());
        }

        self.status.set_state(WorkerState::Connecting);
        info!(
            "Connecting to meter on {} ({} baud, {} data bits, parity {})",
            connection.port,
            connection.baud_rate,
            u8::from(connection.data_bits),
            connection.parity
        );

        let channel = match self.connector.open(connection) {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open serial port: {}", e);
                self.status.set_state(WorkerState::Failed);
                self.queue.push(Event::Error(e.to_string()));
                return Err(e.into());
            }
        };

        self.status.set_state(WorkerState::Polling);
        let poll = PollLoop {
            port: connection.port.clone(),
            channel,
            decoder,
            buffer: ByteBuffer::new(self.config.buffer_limit),
            queue: self.queue.clone(),
            status: self.status.clone(),
            cancel: Arc::clone(&self.cancel),
            poll_interval: self.config.poll_interval,
            sequence: 0,
        };

        let handle = thread::Builder::new()
            .name("meter-ingest".into())
            .spawn(move || poll.run())
            .map_err(|e| {
                self.status.set_state(WorkerState::Failed);
                self.queue.push(Event::Error(format!("Failed to start reader: {}", e)));
                IngestError::Spawn(e)
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Request cancellation and wait for the worker thread to exit.
    ///
    /// Idempotent: calling it on an idle, stopped or failed worker is a
    /// no-op. The serial channel is closed by the worker thread before it
    /// exits, so it is never touched after this returns `Ok`.
    pub fn stop(&mut self) -> Result<(), IngestError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.cancel.store(true, Ordering::Release);
        let deadline = Instant::now() + self.config.stop_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Ingestion worker still running after {:?}",
                    self.config.stop_timeout
                );
                self.handle = Some(handle);
                return Err(IngestError::JoinTimeout(self.config.stop_timeout));
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            self.status.set_state(WorkerState::Failed);
            return Err(IngestError::WorkerPanicked);
        }
        Ok(())
    }
}

impl<D: FrameDecoder + 'static> Drop for IngestionWorker<D> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop() {
                warn!("Ingestion worker not stopped cleanly: {}", e);
            }
        }
    }
}

/// State moved onto the worker thread
struct PollLoop<D: FrameDecoder> {
    port: String,
    channel: Box<dyn SerialChannel>,
    decoder: D,
    buffer: ByteBuffer,
    queue: EventQueue,
    status: WorkerStatus,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
    sequence: u64,
}

enum LoopExit {
    Cancelled,
    Failed,
}

impl<D: FrameDecoder> PollLoop<D> {
    fn run(mut self) {
        let span = info_span!("ingest", port = %self.port);
        let _guard = span.enter();
        info!("Ingestion worker started");

        let exit = loop {
            if self.cancel.load(Ordering::Acquire) {
                break LoopExit::Cancelled;
            }

            match self.channel.read_available() {
                Ok(chunk) if !chunk.is_empty() => self.ingest(&chunk),
                Ok(_) => {}
                Err(e) => {
                    error!("Serial read failed: {}", e);
                    counter!("meter_io_errors_total").increment(1);
                    self.channel.close();
                    self.status.set_state(WorkerState::Failed);
                    self.queue.push(Event::Error(format!("Serial read failed: {}", e)));
                    break LoopExit::Failed;
                }
            }

            if self.cancel.load(Ordering::Acquire) {
                break LoopExit::Cancelled;
            }
            thread::sleep(self.poll_interval);
        };

        if let LoopExit::Cancelled = exit {
            self.status.set_state(WorkerState::Stopping);
            self.channel.close();
            self.status.set_state(WorkerState::Stopped);
            self.queue.push(Event::Stopped);
        }
        info!(frames = self.sequence, "Ingestion worker finished");
    }

    fn ingest(&mut self, chunk: &[u8]) {
        let dropped = self.buffer.append(chunk);
        if dropped > 0 {
            debug!(dropped, "Byte buffer overflow, resynchronising decoder");
            counter!("meter_buffer_overflow_bytes_total").increment(dropped as u64);
            self.decoder.reset();
            self.decoder.add_bytes(self.buffer.snapshot());
        } else {
            self.decoder.add_bytes(chunk);
        }

        while let Some(raw) = self.decoder.try_extract_frame() {
            self.handle_frame(raw);
        }
        self.status
            .inner
            .buffered_bytes
            .store(self.buffer.len(), Ordering::Release);
    }

    fn handle_frame(&mut self, raw: D::Frame) {
        match raw.decode() {
            Ok(mut frame) => {
                self.release_consumed();
                self.sequence += 1;
                counter!("meter_frames_received_total").increment(1);

                for skipped in frame.skipped.drain(..) {
                    self.queue
                        .push(Event::Warning(format!("Skipped entry: {}", skipped)));
                }

                let received_at = Local::now();
                debug!(
                    sequence = self.sequence,
                    entries = frame.len(),
                    wire_len = raw.wire_len(),
                    "Frame decoded"
                );
                self.queue.push(Event::FrameReceived {
                    sequence: self.sequence,
                    received_at,
                    entry_count: frame.len(),
                });
                self.queue.push(Event::DisplayUpdate {
                    sequence: self.sequence,
                    received_at,
                    captured: Instant::now(),
                    frame: Arc::new(frame),
                });
                self.status.inner.frames_decoded.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                warn!("Failed to decode frame: {}", e);
                counter!("meter_decode_errors_total").increment(1);
                self.status.inner.decode_errors.fetch_add(1, Ordering::AcqRel);
                if e.frame_consumed() {
                    self.release_consumed();
                }
                self.queue
                    .push(Event::Warning(format!("Failed to decode frame: {}", e)));
            }
        }
    }

    /// Drop consumed bytes, keeping the head of the next frame if one arrived
    fn release_consumed(&mut self) {
        match self.decoder.pending_len() {
            0 => self.buffer.clear(),
            pending => self.buffer.retain_last(pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, Script, ScriptedConnector};
    use meter_protocol::{
        ConfigError, ConnectError, DecodeError, DecodedFrame, Reading, SmlFrameBuilder,
        SmlStreamReader,
    };
    use std::io;

    /// Hands out one premature frame per chunk and never drops bytes itself
    #[derive(Default)]
    struct EagerDecoder {
        pending: Vec<u8>,
        ready: bool,
    }

    struct PrematureFrame;

    impl RawFrame for PrematureFrame {
        fn decode(&self) -> Result<DecodedFrame, DecodeError> {
            Err(DecodeError::NeedMoreData("end sequence missing".into()))
        }

        fn wire_len(&self) -> usize {
            0
        }
    }

    impl FrameDecoder for EagerDecoder {
        type Frame = PrematureFrame;

        fn add_bytes(&mut self, bytes: &[u8]) {
            self.pending.extend_from_slice(bytes);
            self.ready = true;
        }

        fn try_extract_frame(&mut self) -> Option<PrematureFrame> {
            std::mem::take(&mut self.ready).then_some(PrematureFrame)
        }

        fn pending_len(&self) -> usize {
            self.pending.len()
        }

        fn reset(&mut self) {
            self.pending.clear();
            self.ready = false;
        }
    }

    fn telegram() -> Vec<u8> {
        SmlFrameBuilder::new(b"\x0aTEST000001".to_vec())
            .reading(Reading::new([1, 0, 1, 8, 0, 255], 30, -1, 123_456))
            .reading(Reading::new([1, 0, 16, 7, 0, 255], 27, 0, 420))
            .build()
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(1),
            ..WorkerConfig::default()
        }
    }

    fn worker(connector: ScriptedConnector, config: WorkerConfig) -> IngestionWorker<SmlStreamReader> {
        IngestionWorker::new(
            Arc::new(connector),
            SmlStreamReader::new(),
            EventQueue::new(),
            WorkerStatus::new(),
            config,
        )
    }

    fn frame_events(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Event::FrameReceived { .. }))
            .count()
    }

    #[test]
    fn test_three_chunks_make_one_frame() {
        let bytes = telegram();
        let third = bytes.len() / 3;
        let script = Script::new()
            .chunk(&bytes[..third])
            .chunk(&bytes[third..2 * third])
            .chunk(&bytes[2 * third..]);
        let (connector, watch) = ScriptedConnector::new(script);

        let mut worker = worker(connector, fast_config());
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        assert_eq!(worker.state(), WorkerState::Polling);

        assert!(wait_until(Duration::from_secs(2), || watch.reads() > 3));
        assert!(wait_until(Duration::from_secs(2), || {
            worker.status().frames_decoded() == 1
        }));
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(watch.is_closed());
        assert_eq!(worker.status().buffered_bytes(), 0);

        let events = worker.queue.drain_all();
        assert_eq!(frame_events(&events), 1);
        assert!(matches!(
            events.iter().find(|e| matches!(e, Event::DisplayUpdate { .. })),
            Some(Event::DisplayUpdate { sequence: 1, frame, .. }) if frame.len() == 2
        ));
        assert!(matches!(events.last(), Some(Event::Stopped)));
    }

    #[test]
    fn test_io_error_fails_worker_once() {
        let script = Script::new()
            .chunk(&telegram()[..10])
            .error(io::ErrorKind::BrokenPipe)
            .chunk(b"never read");
        let (connector, watch) = ScriptedConnector::new(script);

        let mut worker = worker(connector, fast_config());
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();

        assert!(wait_until(Duration::from_secs(2), || worker.status().is_terminal()));
        // Give a misbehaving loop the chance to read again
        thread::sleep(Duration::from_millis(20));

        assert_eq!(worker.state(), WorkerState::Failed);
        assert!(watch.is_closed());
        assert_eq!(watch.reads(), 2);

        let events = worker.queue.drain_all();
        let errors = events.iter().filter(|e| matches!(e, Event::Error(_))).count();
        assert_eq!(errors, 1);
        assert!(!events.iter().any(|e| matches!(e, Event::Stopped)));

        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Failed);
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let (connector, watch) = ScriptedConnector::new(Script::new());
        let mut worker = worker(connector, fast_config());

        let err = worker.start(&ConnectionConfig::new("")).unwrap_err();
        assert!(matches!(err, IngestError::Config(ConfigError::MissingPort)));
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(watch.opens(), 0);

        // Still usable after fixing the configuration
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        worker.stop().unwrap();
    }

    #[test]
    fn test_connect_failure_reported() {
        let (connector, _watch) = ScriptedConnector::failing("/dev/ttyGONE");
        let mut worker = worker(connector, fast_config());

        let err = worker.start(&ConnectionConfig::new("/dev/ttyGONE")).unwrap_err();
        assert!(matches!(err, IngestError::Connect(ConnectError::Open { .. })));
        assert_eq!(worker.state(), WorkerState::Failed);

        let events = worker.queue.drain_all();
        assert!(matches!(events.as_slice(), [Event::Error(_)]));
    }

    #[test]
    fn test_start_twice_rejected() {
        let (connector, _watch) = ScriptedConnector::new(Script::new());
        let mut worker = worker(connector, fast_config());
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();

        let err = worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap_err();
        assert!(matches!(err, IngestError::AlreadyStarted(WorkerState::Polling)));
        worker.stop().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (connector, _watch) = ScriptedConnector::new(Script::new());
        let mut worker = worker(connector, fast_config());
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        worker.stop().unwrap();
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        let events = worker.queue.drain_all();
        let stopped = events.iter().filter(|e| matches!(e, Event::Stopped)).count();
        assert_eq!(stopped, 1);
    }

    #[test]
    fn test_crc_failure_is_warning_and_loop_continues() {
        let mut corrupt = telegram();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let script = Script::new().chunk(&corrupt).chunk(&telegram());
        let (connector, _watch) = ScriptedConnector::new(script);

        let mut worker = worker(connector, fast_config());
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            worker.status().frames_decoded() == 1
        }));
        worker.stop().unwrap();

        assert_eq!(worker.status().decode_errors(), 1);
        let events = worker.queue.drain_all();
        assert!(matches!(events.first(), Some(Event::Warning(msg)) if msg.contains("CRC")));
        assert_eq!(frame_events(&events), 1);
    }

    #[test]
    fn test_overflow_resynchronises_decoder() {
        let frame = telegram();
        let config = WorkerConfig {
            buffer_limit: frame.len() + 16,
            ..fast_config()
        };
        let garbage = vec![0x55u8; frame.len() * 3];
        let script = Script::new().chunk(&garbage).chunk(&frame);
        let (connector, _watch) = ScriptedConnector::new(script);

        let mut worker = worker(connector, config);
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            worker.status().frames_decoded() == 1
        }));
        worker.stop().unwrap();
        assert_eq!(worker.status().buffered_bytes(), 0);
    }

    #[test]
    fn test_need_more_data_keeps_buffer() {
        let script = Script::new().chunk(b"\x1b\x1b\x1b\x1b\x01\x01\x01\x01head").chunk(b"tail");
        let (connector, watch) = ScriptedConnector::new(script);
        let mut worker = IngestionWorker::new(
            Arc::new(connector),
            EagerDecoder::default(),
            EventQueue::new(),
            WorkerStatus::new(),
            fast_config(),
        );
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            worker.status().decode_errors() == 2 && worker.status().buffered_bytes() == 16
        }));
        assert!(wait_until(Duration::from_secs(2), || watch.reads() > 5));
        assert_eq!(worker.state(), WorkerState::Polling);
        worker.stop().unwrap();

        assert_eq!(worker.status().buffered_bytes(), 16);
        let events = worker.queue.drain_all();
        let warnings = events
            .iter()
            .filter(|e| matches!(e, Event::Warning(msg) if msg.contains("needs more data")))
            .count();
        assert_eq!(warnings, 2);
        assert_eq!(frame_events(&events), 0);
    }

    #[test]
    fn test_partial_next_frame_stays_buffered() {
        let first = telegram();
        let second = telegram();
        let half = second.len() / 2;
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second[..half]);
        let script = Script::new().chunk(&chunk);
        let (connector, _watch) = ScriptedConnector::new(script);

        let mut worker = worker(connector, fast_config());
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            worker.status().frames_decoded() == 1 && worker.status().buffered_bytes() == half
        }));
        worker.stop().unwrap();
        assert_eq!(worker.status().buffered_bytes(), half);
    }

    #[test]
    fn test_stop_observed_after_slow_read() {
        let script = Script::new().stall(Duration::from_millis(200));
        let (connector, watch) = ScriptedConnector::new(script);
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_millis(400),
            ..WorkerConfig::default()
        };

        let mut worker = worker(connector, config);
        worker.start(&ConnectionConfig::new("/dev/ttyTEST")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || watch.reads() == 1));
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_worker_state_display() {
        assert_eq!(WorkerState::Polling.to_string(), "polling");
        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::Stopping.is_terminal());
    }
}
