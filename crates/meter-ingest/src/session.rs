//! Meter Session
//!
//! Ties one connection's worker to the queue, status cell and history that
//! the presentation side holds on to. Reconnecting swaps the worker while
//! keeping those shared handles, so an existing [`ConsumerLoop`] keeps
//! working.

use crate::consumer::{ConsumerLoop, HistoryEntry, Presenter};
use crate::error::IngestError;
use crate::event::EventQueue;
use crate::throttle::ThrottlePolicy;
use crate::worker::{IngestionWorker, WorkerConfig, WorkerState, WorkerStatus};
use meter_protocol::{ConnectionConfig, FrameDecoder, SerialConnector};
use ring_buffer::{SharedHistory, DEFAULT_CAPACITY};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a session needs besides the connector
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial connection parameters
    pub connection: ConnectionConfig,
    /// Worker tuning
    pub worker: WorkerConfig,
    /// Display throttle policy
    pub throttle: ThrottlePolicy,
    /// Number of frames kept in history
    pub history_capacity: usize,
    /// Consumer tick cadence
    pub tick_interval: Duration,
}

impl SessionConfig {
    /// Defaults for the given serial port
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(port),
            worker: WorkerConfig::default(),
            throttle: ThrottlePolicy::default(),
            history_capacity: DEFAULT_CAPACITY,
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// A meter connection owned by the caller
pub struct MeterSession<D: FrameDecoder + Default + 'static> {
    connector: Arc<dyn SerialConnector>,
    config: SessionConfig,
    queue: EventQueue,
    status: WorkerStatus,
    history: SharedHistory<HistoryEntry>,
    worker: Option<IngestionWorker<D>>,
}

impl<D: FrameDecoder + Default + 'static> MeterSession<D> {
    /// Create a disconnected session
    pub fn new(connector: Arc<dyn SerialConnector>, config: SessionConfig) -> Self {
        let history = SharedHistory::new(config.history_capacity.max(1));
        Self {
            connector,
            config,
            queue: EventQueue::new(),
            status: WorkerStatus::new(),
            history,
            worker: None,
        }
    }

    /// Start a worker for the configured connection
    pub fn connect(&mut self) -> Result<(), IngestError> {
        self.disconnect()?;

        let mut worker = IngestionWorker::new(
            Arc::clone(&self.connector),
            D::default(),
            self.queue.clone(),
            self.status.clone(),
            self.config.worker.clone(),
        );
        let result = worker.start(&self.config.connection);
        self.worker = Some(worker);
        result
    }

    /// Stop and join the current worker, if any
    pub fn disconnect(&mut self) -> Result<(), IngestError> {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.stop() {
                self.worker = Some(worker);
                return Err(e);
            }
            info!("Disconnected from {}", self.config.connection.port);
        }
        Ok(())
    }

    /// Stop the current worker and connect with new parameters
    pub fn reconnect(&mut self, connection: ConnectionConfig) -> Result<(), IngestError> {
        self.disconnect()?;
        self.config.connection = connection;
        self.connect()
    }

    /// Consumer loop bound to this session's queue, status and history
    pub fn consumer<P: Presenter>(&self, presenter: P) -> ConsumerLoop<P> {
        ConsumerLoop::new(
            self.queue.clone(),
            self.status.clone(),
            self.history.clone(),
            self.config.throttle,
            presenter,
            self.config.tick_interval,
        )
    }

    /// Current worker state, `Idle` when never connected
    pub fn state(&self) -> WorkerState {
        self.status.state()
    }

    /// Shared worker status
    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    /// History ring shared with the consumer loop
    pub fn history(&self) -> &SharedHistory<HistoryEntry> {
        &self.history
    }

    /// Active connection parameters
    pub fn connection(&self) -> &ConnectionConfig {
        &self.config.connection
    }
}

impl<D: FrameDecoder + Default + 'static> Drop for MeterSession<D> {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
