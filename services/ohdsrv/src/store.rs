//! Last-event persistence
//!
//! Each device keeps the timestamp of its most recent event in its own small
//! text file, one line of the form `YYYY/MM/DD HH:MM:SS`. The file is
//! rewritten on every event and read back when a status message needs the
//! last reading.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use ohd_protocols::Timestamp;
use tracing::debug;

use crate::error::{OhdSrvError, Result};

const RECORD_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Storage for the last event per device
pub trait EventStore: Send + Sync {
    /// Stored timestamp; `Ok(None)` when nothing has been recorded yet
    fn load(&self, path: &Path) -> Result<Option<Timestamp>>;

    /// Replace the stored timestamp
    fn save(&self, path: &Path, timestamp: &Timestamp) -> Result<()>;
}

/// One text file per device
#[derive(Debug, Default, Clone, Copy)]
pub struct FileEventStore;

impl FileEventStore {
    pub fn format_record(timestamp: &Timestamp) -> String {
        format!(
            "{:04}/{:02}/{:02} {:02}:{:02}:{:02}\n",
            timestamp.year,
            timestamp.month,
            timestamp.day,
            timestamp.hour,
            timestamp.minute,
            timestamp.second
        )
    }

    pub fn parse_record(content: &str) -> Result<Timestamp> {
        // Older writers left a NUL after the newline
        let line = content.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        NaiveDateTime::parse_from_str(line, RECORD_FORMAT)
            .map(Timestamp::from)
            .map_err(|e| {
                OhdSrvError::PersistenceError(format!("Invalid event record {line:?}: {e}"))
            })
    }
}

impl EventStore for FileEventStore {
    fn load(&self, path: &Path) -> Result<Option<Timestamp>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OhdSrvError::PersistenceError(format!(
                    "Cannot read {}: {}",
                    path.display(),
                    e
                )))
            },
        };
        Self::parse_record(&content).map(Some)
    }

    fn save(&self, path: &Path, timestamp: &Timestamp) -> Result<()> {
        std::fs::write(path, Self::format_record(timestamp)).map_err(|e| {
            OhdSrvError::PersistenceError(format!("Cannot write {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), %timestamp, "Event recorded");
        Ok(())
    }
}

/// In-memory store for tests and hardware-less runs
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    records: Mutex<HashMap<PathBuf, Timestamp>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, Timestamp>>> {
        self.records
            .lock()
            .map_err(|_| OhdSrvError::PersistenceError("event store lock poisoned".to_string()))
    }
}

impl EventStore for MemoryEventStore {
    fn load(&self, path: &Path) -> Result<Option<Timestamp>> {
        Ok(self.records()?.get(path).copied())
    }

    fn save(&self, path: &Path, timestamp: &Timestamp) -> Result<()> {
        self.records()?.insert(path.to_path_buf(), *timestamp);
        Ok(())
    }
}
