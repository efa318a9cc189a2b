//! Shared append-only log files.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Handle to one log file; clones write to the same file.
#[derive(Debug, Clone)]
pub struct LogWriter {
    path: PathBuf,
    file: Arc<AsyncMutex<File>>,
}

impl LogWriter {
    pub async fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        debug!("Opened log file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(AsyncMutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. The lock is held for the whole line so concurrent
    /// writers never interleave mid-line.
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

/// Hands out one writer per path so instances sharing a file share a handle.
#[derive(Debug, Default)]
pub struct LogWriterRegistry {
    writers: Mutex<HashMap<PathBuf, LogWriter>>,
}

impl LogWriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn writer(&self, path: &Path) -> io::Result<LogWriter> {
        if let Some(existing) = self.lookup(path) {
            return Ok(existing);
        }

        let opened = LogWriter::open(path).await?;

        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        // Another instance may have opened it while we were awaiting
        Ok(writers
            .entry(path.to_path_buf())
            .or_insert(opened)
            .clone())
    }

    fn lookup(&self, path: &Path) -> Option<LogWriter> {
        self.writers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("out.log");

        let writer = LogWriter::open(&path).await.unwrap();
        writer.write_line("first").await.unwrap();
        writer.write_line("second").await.unwrap();

        // Reopening appends rather than truncating
        let again = LogWriter::open(&path).await.unwrap();
        again.write_line("third").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\nthird\n");
    }

    #[tokio::test]
    async fn test_registry_shares_handles() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LogWriterRegistry::new();

        let a = registry.writer(&dir.path().join("out.log")).await.unwrap();
        let b = registry.writer(&dir.path().join("out.log")).await.unwrap();
        let c = registry.writer(&dir.path().join("error.log")).await.unwrap();

        assert!(Arc::ptr_eq(&a.file, &b.file));
        assert!(!Arc::ptr_eq(&a.file, &c.file));
    }
}
