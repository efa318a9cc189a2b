//! # vigil process file
//!
//! PID file persistence for supervised processes.
//!
//! Each running instance owns `<dir>/<name>-<instance>.json`. Files left
//! behind by a previous supervisor run are cleaned up at startup when their
//! PID is no longer alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vigil_common::{ProcessError, ProcessResult};

/// Process file data structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFile {
    pub name: String,
    pub instance: u32,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub config_hash: String,
}

impl ProcessFile {
    pub fn new(name: impl Into<String>, instance: u32, pid: u32, config_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance,
            pid,
            start_time: Utc::now(),
            config_hash: config_hash.into(),
        }
    }

    fn label(&self) -> String {
        format!("{}-{}", self.name, self.instance)
    }
}

/// Reads and writes PID files under one directory.
#[derive(Debug, Clone)]
pub struct ProcessFileManager {
    directory: PathBuf,
}

impl ProcessFileManager {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, name: &str, instance: u32) -> PathBuf {
        self.directory.join(format!("{}-{}.json", name, instance))
    }

    /// Save process file to disk.
    pub async fn write(&self, file: &ProcessFile) -> ProcessResult<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                ProcessError::process_file(file.label(), format!("Failed to create PID directory: {}", e))
            })?;

        let json = serde_json::to_string_pretty(file).map_err(|e| {
            ProcessError::process_file(file.label(), format!("Failed to serialize process file: {}", e))
        })?;

        let path = self.path_for(&file.name, file.instance);
        tokio::fs::write(&path, json).await.map_err(|e| {
            ProcessError::process_file(file.label(), format!("Failed to write process file: {}", e))
        })?;

        debug!("Wrote PID file {} (PID: {})", path.display(), file.pid);
        Ok(())
    }

    /// Load process file from disk.
    pub async fn read(&self, name: &str, instance: u32) -> ProcessResult<ProcessFile> {
        Self::load(&self.path_for(name, instance)).await
    }

    /// Delete process file from disk; a missing file is not an error.
    pub async fn delete(&self, name: &str, instance: u32) -> ProcessResult<()> {
        let path = self.path_for(name, instance);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted PID file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProcessError::process_file(
                format!("{}-{}", name, instance),
                format!("Failed to delete process file: {}", e),
            )),
        }
    }

    /// All readable process files in the directory.
    pub async fn list(&self) -> ProcessResult<Vec<ProcessFile>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ProcessError::process_file(
                    "pid-directory",
                    format!("Failed to read PID directory: {}", e),
                ))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ProcessError::process_file("pid-directory", format!("Failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }

            match Self::load(&path).await {
                Ok(file) => files.push(file),
                Err(e) => warn!("Skipping unreadable PID file {}: {}", path.display(), e),
            }
        }

        Ok(files)
    }

    /// Remove files whose PID is no longer alive and return the survivors.
    /// A file that cannot be removed is logged and left in place.
    pub async fn clean_stale(&self) -> ProcessResult<Vec<ProcessFile>> {
        let mut alive = Vec::new();
        let mut cleaned = 0;

        for file in self.list().await? {
            if vigil_process::process_exists(file.pid) {
                info!(
                    "Found process from a previous run: {} (PID: {})",
                    file.label(),
                    file.pid
                );
                alive.push(file);
            } else {
                debug!("Process {} (PID: {}) no longer exists, cleaning up", file.label(), file.pid);
                match self.delete(&file.name, file.instance).await {
                    Ok(()) => cleaned += 1,
                    Err(e) => warn!("Leaving stale PID file in place: {}", e),
                }
            }
        }

        info!(
            "PID file scan complete: {} alive, {} cleaned up",
            alive.len(),
            cleaned
        );
        Ok(alive)
    }

    async fn load(path: &Path) -> ProcessResult<ProcessFile> {
        let label = path.display().to_string();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProcessError::process_file(label.clone(), format!("Failed to read process file: {}", e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ProcessError::process_file(label, format!("Failed to parse process file: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let manager = ProcessFileManager::new(dir.path().join("pids"));

        let file = ProcessFile::new("voice-resolver", 0, std::process::id(), "abc123");
        manager.write(&file).await.unwrap();

        let loaded = manager.read("voice-resolver", 0).await.unwrap();
        assert_eq!(loaded, file);

        manager.delete("voice-resolver", 0).await.unwrap();
        assert!(manager.read("voice-resolver", 0).await.is_err());

        // Deleting twice is fine
        manager.delete("voice-resolver", 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_skips_garbage() {
        let dir = tempdir().unwrap();
        let manager = ProcessFileManager::new(dir.path());

        manager
            .write(&ProcessFile::new("api", 1, std::process::id(), "h"))
            .await
            .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = manager.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "api");
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let dir = tempdir().unwrap();
        let manager = ProcessFileManager::new(dir.path().join("absent"));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_stale() {
        let dir = tempdir().unwrap();
        let manager = ProcessFileManager::new(dir.path());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        manager
            .write(&ProcessFile::new("alive", 0, std::process::id(), "h"))
            .await
            .unwrap();
        manager
            .write(&ProcessFile::new("dead", 0, dead_pid, "h"))
            .await
            .unwrap();

        let alive = manager.clean_stale().await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].name, "alive");
        assert!(!manager.path_for("dead", 0).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_stale_continues_past_undeletable_file() {
        let dir = tempdir().unwrap();
        let manager = ProcessFileManager::new(dir.path());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        // Stale entry whose canonical path is a directory, so removal fails
        let stale = ProcessFile::new("ghost", 0, dead_pid, "h");
        std::fs::write(
            dir.path().join("renamed.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();
        std::fs::create_dir(manager.path_for("ghost", 0)).unwrap();

        manager
            .write(&ProcessFile::new("alive", 0, std::process::id(), "h"))
            .await
            .unwrap();

        let alive = manager.clean_stale().await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].name, "alive");
        assert!(dir.path().join("renamed.json").exists());
    }
}
