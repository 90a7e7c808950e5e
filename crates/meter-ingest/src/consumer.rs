//! Consumer Loop
//!
//! Runs on the presentation side. Each tick drains the event queue, appends
//! every decoded frame to the shared history and hands throttled updates to
//! a [`Presenter`].

use crate::event::{Event, EventQueue};
use crate::throttle::{DisplayThrottle, ThrottlePolicy};
use crate::worker::WorkerStatus;
use chrono::{DateTime, Local};
use meter_protocol::DecodedFrame;
use ring_buffer::SharedHistory;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One observation in the history ring
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// When the frame was decoded
    pub timestamp: DateTime<Local>,
    /// Worker frame counter
    pub sequence: u64,
    /// Decoded measurements
    pub frame: Arc<DecodedFrame>,
}

/// Receives what the consumer loop wants shown
pub trait Presenter {
    /// A throttled frame ready for display
    fn on_display_update(&mut self, entry: &HistoryEntry);

    /// Informational line for the debug log
    fn on_debug_message(&mut self, text: &str);

    /// Error to surface to the operator
    fn on_error(&mut self, text: &str);
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking
    Continue,
    /// The worker has terminated; no further ticks are useful
    Halt,
}

/// Drains worker events on a fixed cadence
pub struct ConsumerLoop<P: Presenter> {
    queue: EventQueue,
    history: SharedHistory<HistoryEntry>,
    throttle: DisplayThrottle,
    presenter: P,
    worker: WorkerStatus,
    tick_interval: Duration,
    halted: bool,
}

impl<P: Presenter> ConsumerLoop<P> {
    /// Create a consumer over the worker's queue and status
    pub fn new(
        queue: EventQueue,
        worker: WorkerStatus,
        history: SharedHistory<HistoryEntry>,
        policy: ThrottlePolicy,
        presenter: P,
        tick_interval: Duration,
    ) -> Self {
        Self {
            queue,
            history,
            throttle: DisplayThrottle::new(policy),
            presenter,
            worker,
            tick_interval,
            halted: false,
        }
    }

    /// History ring shared with exporters
    pub fn history(&self) -> &SharedHistory<HistoryEntry> {
        &self.history
    }

    /// The presenter receiving updates
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Change the display throttle policy
    pub fn set_policy(&mut self, policy: ThrottlePolicy) {
        self.throttle.set_policy(policy);
    }

    /// Allow ticking again after a reconnect
    pub fn resume(&mut self) {
        self.halted = false;
        self.throttle.reset();
    }

    /// Whether a previous tick saw the worker terminate
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Process every queued event once
    pub fn tick(&mut self) -> TickOutcome {
        if self.halted {
            return TickOutcome::Halt;
        }

        let mut worker_ended = false;
        for event in self.queue.drain_all() {
            match event {
                Event::FrameReceived {
                    sequence,
                    entry_count,
                    ..
                } => {
                    self.presenter.on_debug_message(&format!(
                        "Frame {} received ({} entries)",
                        sequence, entry_count
                    ));
                }
                Event::DisplayUpdate {
                    sequence,
                    received_at,
                    captured,
                    frame,
                } => {
                    let entry = HistoryEntry {
                        timestamp: received_at,
                        sequence,
                        frame,
                    };
                    self.history.push(entry.clone());
                    if self.throttle.should_display(captured, sequence) {
                        self.presenter.on_display_update(&entry);
                    }
                }
                Event::Warning(message) => self.presenter.on_debug_message(&message),
                Event::Error(message) => {
                    self.presenter.on_error(&message);
                    worker_ended |= self.worker.is_terminal();
                }
                Event::Stopped => {
                    self.presenter.on_debug_message("Disconnected from meter");
                    worker_ended |= self.worker.is_terminal();
                }
            }
        }

        if worker_ended {
            info!(state = %self.worker.state(), "Worker terminated, consumer halting");
            self.halted = true;
            TickOutcome::Halt
        } else {
            TickOutcome::Continue
        }
    }

    /// Tick on a fixed interval until the worker terminates or `shutdown`
    /// resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> TickOutcome
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick() == TickOutcome::Halt {
                        return TickOutcome::Halt;
                    }
                }
                _ = &mut shutdown => {
                    debug!("Consumer loop shutdown requested");
                    return TickOutcome::Continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        displayed: Vec<u64>,
        debug: Vec<String>,
        errors: Vec<String>,
    }

    impl Presenter for Recorder {
        fn on_display_update(&mut self, entry: &HistoryEntry) {
            self.displayed.push(entry.sequence);
        }

        fn on_debug_message(&mut self, text: &str) {
            self.debug.push(text.to_string());
        }

        fn on_error(&mut self, text: &str) {
            self.errors.push(text.to_string());
        }
    }

    fn update(sequence: u64, captured: Instant) -> Event {
        Event::DisplayUpdate {
            sequence,
            received_at: Local::now(),
            captured,
            frame: Arc::new(DecodedFrame::default()),
        }
    }

    fn consumer(policy: ThrottlePolicy, capacity: usize) -> (ConsumerLoop<Recorder>, EventQueue, WorkerStatus) {
        let queue = EventQueue::new();
        let status = WorkerStatus::new();
        let consumer = ConsumerLoop::new(
            queue.clone(),
            status.clone(),
            SharedHistory::new(capacity),
            policy,
            Recorder::default(),
            Duration::from_millis(100),
        );
        (consumer, queue, status)
    }

    #[test]
    fn test_history_keeps_last_sixty() {
        let (mut consumer, queue, _status) = consumer(ThrottlePolicy::EveryNthFrame(1), 60);
        let now = Instant::now();
        for sequence in 1..=61 {
            queue.push(update(sequence, now));
        }

        assert_eq!(consumer.tick(), TickOutcome::Continue);

        let sequences: Vec<u64> = consumer
            .history()
            .snapshot()
            .iter()
            .map(|entry| entry.sequence)
            .collect();
        let expected: Vec<u64> = (2..=61).collect();
        assert_eq!(sequences, expected);
        assert_eq!(consumer.presenter().displayed.len(), 61);
    }

    #[test]
    fn test_throttled_frames_still_recorded() {
        let (mut consumer, queue, _status) =
            consumer(ThrottlePolicy::Elapsed(Duration::from_secs(5)), 60);
        let base = Instant::now();
        for (sequence, secs) in [(1, 0), (2, 1), (3, 2), (4, 4), (5, 5), (6, 6)] {
            queue.push(update(sequence, base + Duration::from_secs(secs)));
        }

        consumer.tick();

        assert_eq!(consumer.presenter().displayed, vec![1, 5]);
        assert_eq!(consumer.history().len(), 6);
    }

    #[test]
    fn test_messages_routed_to_presenter() {
        let (mut consumer, queue, _status) = consumer(ThrottlePolicy::default(), 60);
        queue.push(Event::FrameReceived {
            sequence: 7,
            received_at: Local::now(),
            entry_count: 3,
        });
        queue.push(Event::Warning("Failed to decode frame: CRC mismatch".into()));

        consumer.tick();

        let presenter = consumer.presenter();
        assert_eq!(
            presenter.debug,
            vec!["Frame 7 received (3 entries)", "Failed to decode frame: CRC mismatch"]
        );
        assert!(presenter.errors.is_empty());
    }

    #[test]
    fn test_error_halts_only_when_worker_terminal() {
        let (mut consumer, queue, status) = consumer(ThrottlePolicy::default(), 60);

        status.set_state(WorkerState::Polling);
        queue.push(Event::Error("transient".into()));
        assert_eq!(consumer.tick(), TickOutcome::Continue);

        status.set_state(WorkerState::Failed);
        queue.push(Event::Error("Serial read failed: broken pipe".into()));
        assert_eq!(consumer.tick(), TickOutcome::Halt);
        assert!(consumer.is_halted());
        assert_eq!(consumer.presenter().errors.len(), 2);

        // Halted consumers ignore further events until resumed
        queue.push(Event::Warning("late".into()));
        assert_eq!(consumer.tick(), TickOutcome::Halt);
        assert_eq!(queue.len(), 1);

        consumer.resume();
        status.set_state(WorkerState::Polling);
        assert_eq!(consumer.tick(), TickOutcome::Continue);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_halts_after_worker_failure() {
        let (mut consumer, queue, status) = consumer(ThrottlePolicy::default(), 60);
        queue.push(update(1, Instant::now()));
        status.set_state(WorkerState::Failed);
        queue.push(Event::Error("Serial read failed".into()));

        let outcome = consumer.run(std::future::pending::<()>()).await;

        assert_eq!(outcome, TickOutcome::Halt);
        assert_eq!(consumer.presenter().displayed, vec![1]);
        assert_eq!(consumer.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_on_shutdown() {
        let (mut consumer, queue, _status) = consumer(ThrottlePolicy::default(), 60);
        queue.push(update(1, Instant::now()));

        let outcome = consumer
            .run(tokio::time::sleep(Duration::from_millis(350)))
            .await;

        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(consumer.history().len(), 1);
    }
}
