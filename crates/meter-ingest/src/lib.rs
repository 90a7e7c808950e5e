//! Smart Meter Ingestion Pipeline
//!
//! A dedicated worker thread owns the serial channel and turns bytes into
//! decoded frames; a consumer loop on the owning thread drains the events,
//! keeps a bounded history and forwards throttled updates to a presenter.

mod consumer;
mod error;
mod event;
mod session;
mod throttle;
mod worker;

pub use consumer::{ConsumerLoop, HistoryEntry, Presenter, TickOutcome};
pub use error::IngestError;
pub use event::{Event, EventQueue};
pub use session::{MeterSession, SessionConfig};
pub use throttle::{DisplayThrottle, ThrottlePolicy};
pub use worker::{IngestionWorker, WorkerConfig, WorkerState, WorkerStatus};

#[cfg(test)]
pub(crate) mod testing;
