//! Ingestion Error Types

use crate::worker::WorkerState;
use meter_protocol::{ConfigError, ConnectError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced synchronously by the worker and session
#[derive(Debug, Error)]
pub enum IngestError {
    /// Connection parameters rejected before any I/O
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Serial channel could not be opened
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// `start` called on a worker that already left the idle state
    #[error("Ingestion worker already started (state: {0})")]
    AlreadyStarted(WorkerState),

    /// The OS refused to create the worker thread
    #[error("Failed to spawn ingestion thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Worker did not observe cancellation in time
    #[error("Ingestion worker did not stop within {0:?}")]
    JoinTimeout(Duration),

    /// Worker thread panicked
    #[error("Ingestion worker panicked")]
    WorkerPanicked,
}
