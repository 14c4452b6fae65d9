//! JSON-lines event log.
//!
//! An [`EventLog`] is an append-only file of serialized [`MarketEvent`]s,
//! one per line. It doubles as an [`EventSink`] (so a host can tee the
//! live stream to disk) and as the input of the admin CLI, which replays
//! and audits the stream offline.

use super::bus::EventSink;
use super::events::MarketEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::error;

/// Event log failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EventLogError {
    #[error("event log io: {0}")]
    Io(#[from] std::io::Error),

    #[error("event log line {line} is not a valid event: {message}")]
    Malformed { line: usize, message: String },
}

/// Append-only JSON-lines sink for market events.
pub struct EventLog {
    writer: Mutex<BufWriter<File>>,
}

impl EventLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event and flush it.
    pub fn append(&self, event: &MarketEvent) -> Result<(), EventLogError> {
        let line = serde_json::to_string(event)
            .map_err(|e| EventLogError::Malformed {
                line: 0,
                message: e.to_string(),
            })?;
        let mut writer = self.writer.lock().expect("event log lock poisoned");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Read every event from the log at `path`, in file order.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<MarketEvent>, EventLogError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: MarketEvent =
                serde_json::from_str(&line).map_err(|e| EventLogError::Malformed {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            events.push(event);
        }
        Ok(events)
    }
}

impl EventSink for EventLog {
    fn publish(&self, _topic: &str, event: &MarketEvent) {
        if let Err(e) = self.append(event) {
            // The log is a tee, not the source of truth; losing a line is
            // logged, never fatal for the trading path.
            error!(error = %e, "failed to append event to log");
        }
    }
}
