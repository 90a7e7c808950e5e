//! Console output

use chrono::Local;
use meter_ingest::{HistoryEntry, Presenter};
use std::io::{self, Stdout, Write};
use tracing::{debug, error};

/// Prints meter readings as a table and debug lines with a `[HH:MM:SS]` stamp
pub struct ConsolePresenter<W: Write> {
    out: W,
}

impl ConsolePresenter<Stdout> {
    /// Presenter writing to standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn stamped(&mut self, text: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        // Console write failures are not actionable here
        let _ = writeln!(self.out, "[{}] {}", stamp, text);
        let _ = self.out.flush();
    }

    fn render(&mut self, entry: &HistoryEntry) -> io::Result<()> {
        let frame = &entry.frame;
        writeln!(
            self.out,
            "── {} ── frame #{} ── meter {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.sequence,
            frame.server_id.as_deref().unwrap_or("-")
        )?;
        if frame.is_empty() {
            writeln!(self.out, "   no OBIS values to display")?;
        }
        for measurement in &frame.entries {
            let marker = if measurement.obis.is_highlighted() { '*' } else { ' ' };
            writeln!(
                self.out,
                " {} {:<10} {:>16} {}",
                marker,
                measurement.label(),
                measurement.display_value(),
                measurement.unit_symbol()
            )?;
        }
        self.out.flush()
    }
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn on_display_update(&mut self, entry: &HistoryEntry) {
        if entry.frame.is_empty() {
            self.stamped("Warning: no OBIS values to display");
        }
        if let Err(e) = self.render(entry) {
            error!("Failed to write to console: {}", e);
        }
    }

    fn on_debug_message(&mut self, text: &str) {
        debug!("{}", text);
        self.stamped(text);
    }

    fn on_error(&mut self, text: &str) {
        error!("{}", text);
        self.stamped(&format!("ERROR: {}", text));
    }
}
