//! Export sinks

use crate::error::ExportError;
use chrono::{DateTime, Local};
use meter_ingest::HistoryEntry;
use meter_protocol::{EntryValue, MeterEntry};
use ring_buffer::SharedHistory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Output format for history exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Human readable report
    #[default]
    Text,
    /// Pretty-printed JSON array
    Json,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "json" => Ok(ExportFormat::Json),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Text => f.write_str("text"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

/// Destination for an ordered sequence of observations
pub trait ExportSink {
    /// Write all observations, oldest first
    fn write_snapshot(&mut self, observations: &[HistoryEntry]) -> Result<(), ExportError>;
}

/// Plain-text report writer
pub struct TextExporter<W: Write> {
    writer: W,
}

impl<W: Write> TextExporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_entry(&mut self, entry: &MeterEntry) -> std::io::Result<()> {
        let line = format!(
            "  {}: {} {}",
            entry.label(),
            entry.display_value(),
            entry.unit_symbol()
        );
        writeln!(self.writer, "{}", line.trim_end())
    }
}

impl<W: Write> ExportSink for TextExporter<W> {
    fn write_snapshot(&mut self, observations: &[HistoryEntry]) -> Result<(), ExportError> {
        writeln!(
            self.writer,
            "Smart meter data of the last {} observations:",
            observations.len()
        )?;
        writeln!(self.writer)?;

        for (index, observation) in observations.iter().enumerate() {
            writeln!(
                self.writer,
                "Observation {} ({}):",
                index + 1,
                observation.timestamp.format("%Y-%m-%d %H:%M:%S")
            )?;
            if observation.frame.is_empty() {
                writeln!(self.writer, "  no OBIS values available")?;
            }
            for entry in &observation.frame.entries {
                self.write_entry(entry)?;
            }
            writeln!(self.writer)?;
        }

        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ObservationRecord<'a> {
    timestamp: DateTime<Local>,
    sequence: u64,
    server_id: Option<&'a str>,
    entries: Vec<EntryRecord<'a>>,
}

#[derive(Serialize)]
struct EntryRecord<'a> {
    obis: String,
    obis_full: String,
    value: Option<f64>,
    unit: &'static str,
    scaler: Option<i8>,
    raw_value: &'a EntryValue,
}

impl<'a> From<&'a HistoryEntry> for ObservationRecord<'a> {
    fn from(observation: &'a HistoryEntry) -> Self {
        Self {
            timestamp: observation.timestamp,
            sequence: observation.sequence,
            server_id: observation.frame.server_id.as_deref(),
            entries: observation
                .frame
                .entries
                .iter()
                .map(|entry| EntryRecord {
                    obis: entry.label(),
                    obis_full: entry.obis.full(),
                    value: entry.scaled_value(),
                    unit: entry.unit_symbol(),
                    scaler: entry.scaler,
                    raw_value: &entry.value,
                })
                .collect(),
        }
    }
}

/// JSON array writer
pub struct JsonExporter<W: Write> {
    writer: W,
}

impl<W: Write> JsonExporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ExportSink for JsonExporter<W> {
    fn write_snapshot(&mut self, observations: &[HistoryEntry]) -> Result<(), ExportError> {
        let records: Vec<ObservationRecord<'_>> =
            observations.iter().map(ObservationRecord::from).collect();
        serde_json::to_writer_pretty(&mut self.writer, &records)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Copy the history and hand it to `sink`.
///
/// Returns the number of observations written. An empty history yields
/// [`ExportError::NoData`] without calling the sink.
pub fn export_snapshot(
    history: &SharedHistory<HistoryEntry>,
    sink: &mut dyn ExportSink,
) -> Result<usize, ExportError> {
    let snapshot = history.snapshot();
    if snapshot.is_empty() {
        return Err(ExportError::NoData);
    }

    debug!(observations = snapshot.len(), "Exporting history snapshot");
    sink.write_snapshot(&snapshot)?;
    Ok(snapshot.len())
}

/// Export the history to a file, creating it only when there is data
pub fn export_to_file(
    history: &SharedHistory<HistoryEntry>,
    path: &Path,
    format: ExportFormat,
) -> Result<usize, ExportError> {
    if history.is_empty() {
        return Err(ExportError::NoData);
    }

    let writer = BufWriter::new(File::create(path)?);
    let written = match format {
        ExportFormat::Text => export_snapshot(history, &mut TextExporter::new(writer))?,
        ExportFormat::Json => export_snapshot(history, &mut JsonExporter::new(writer))?,
    };
    info!(
        "Exported {} observations to {} ({})",
        written,
        path.display(),
        format
    );
    Ok(written)
}
