//! Export Error Types

use thiserror::Error;

/// Export failures, reported to the caller without touching ingestion
#[derive(Debug, Error)]
pub enum ExportError {
    /// History is empty, nothing was written
    #[error("No data available to export")]
    NoData,

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),
}
