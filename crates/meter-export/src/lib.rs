//! Smart Meter History Export
//!
//! Serializes a point-in-time copy of the observation history, oldest
//! first, as the classic plain-text report or as JSON.

mod error;
mod sink;

pub use error::ExportError;
pub use sink::{
    export_snapshot, export_to_file, ExportFormat, ExportSink, JsonExporter, TextExporter,
};
