//! # vigil log collection
//!
//! Output capture for supervised processes.
//!
//! This crate provides:
//! - Capture of child stdout/stderr into append-only log files
//! - Timestamp prefixes in the descriptor's `log_date_format`
//! - Log file path resolution, per instance or merged
//! - A broadcast collector so a foreground supervisor can echo output

pub mod capture;
pub mod date_format;
pub mod paths;
pub mod writer;

pub use capture::{spawn_capture, CaptureContext};
pub use date_format::LogDateFormat;
pub use paths::LogPaths;
pub use writer::{LogWriter, LogWriterRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const COLLECTOR_CAPACITY: usize = 1024;

/// Log entry from a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub name: String,
    pub instance: u32,
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub message: String,
}

/// Log source (stdout or stderr).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Stdout => write!(f, "out"),
            LogSource::Stderr => write!(f, "err"),
        }
    }
}

/// Fans captured lines out to any number of listeners.
///
/// Lines are dropped when nobody is listening, and slow listeners skip
/// lines rather than holding back capture.
#[derive(Debug, Clone)]
pub struct LogCollector {
    sender: broadcast::Sender<LogEntry>,
}

impl LogCollector {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(COLLECTOR_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn publish(&self, entry: LogEntry) {
        // No receivers is fine
        let _ = self.sender.send(entry);
    }
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new()
    }
}
