//! Restart-on-change file watching.

use glob::Pattern;
use notify::event::EventKind;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use vigil_common::{ProcessError, ProcessResult};

/// Events arriving this close together trigger a single restart.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Paths that never trigger a restart.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    root: PathBuf,
    patterns: Vec<Pattern>,
    excluded: Vec<PathBuf>,
}

impl WatchFilter {
    /// Invalid glob patterns are logged and skipped.
    pub fn new(root: &Path, ignore_watch: &[String], excluded: Vec<PathBuf>) -> Self {
        let patterns = ignore_watch
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid ignore_watch pattern {:?}: {}", raw, e);
                    None
                }
            })
            .collect();

        Self {
            root: root.to_path_buf(),
            patterns,
            excluded,
        }
    }

    /// A path is ignored when it is an excluded file, or when its path
    /// relative to the root (or any single component of it) matches a glob.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.excluded.iter().any(|excluded| excluded == path) {
            return true;
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.patterns.iter().any(|pattern| {
            pattern.matches_path(relative)
                || relative
                    .components()
                    .any(|component| pattern.matches(&component.as_os_str().to_string_lossy()))
        })
    }
}

/// Recursive watcher on an app's working directory.
pub struct AppWatcher {
    // Dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
    changes: ChangeDebouncer,
}

impl AppWatcher {
    pub fn start(id: &str, filter: WatchFilter) -> ProcessResult<Self> {
        let root = filter.root.clone();
        let (sender, events) = mpsc::unbounded_channel();

        let label = id.to_string();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if !is_change(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if !filter.is_ignored(&path) {
                            let _ = sender.send(path);
                        }
                    }
                }
                Err(e) => warn!("File watch error for {}: {}", label, e),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| ProcessError::Watch {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ProcessError::Watch {
                id: id.to_string(),
                reason: format!("cannot watch {}: {}", root.display(), e),
            })?;

        debug!("Watching {} for {}", root.display(), id);
        Ok(Self {
            _watcher: watcher,
            changes: ChangeDebouncer::new(events),
        })
    }

    /// Wait for the next change, swallowing the rest of its burst.
    ///
    /// Cancel safe: a change already received survives a dropped call and
    /// is returned by the next one.
    pub async fn changed(&mut self) -> Option<PathBuf> {
        self.changes.next().await
    }
}

/// Turns a stream of changed paths into one report per burst.
struct ChangeDebouncer {
    events: mpsc::UnboundedReceiver<PathBuf>,
    pending: Option<(PathBuf, Instant)>,
}

impl ChangeDebouncer {
    fn new(events: mpsc::UnboundedReceiver<PathBuf>) -> Self {
        Self { events, pending: None }
    }

    async fn next(&mut self) -> Option<PathBuf> {
        let deadline = match self.pending {
            Some((_, deadline)) => deadline,
            None => {
                let first = self.events.recv().await?;
                let deadline = Instant::now() + DEBOUNCE;
                self.pending = Some((first, deadline));
                deadline
            }
        };

        sleep_until(deadline).await;
        while self.events.try_recv().is_ok() {}

        self.pending.take().map(|(path, _)| path)
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(ignore: &[&str]) -> WatchFilter {
        WatchFilter::new(
            Path::new("/srv/app"),
            &ignore.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            vec![PathBuf::from("/srv/app/logs/out.log")],
        )
    }

    #[test]
    fn test_excluded_log_files() {
        let filter = filter(&[]);
        assert!(filter.is_ignored(Path::new("/srv/app/logs/out.log")));
        assert!(!filter.is_ignored(Path::new("/srv/app/logs/other.log")));
        assert!(!filter.is_ignored(Path::new("/srv/app/main.go")));
    }

    #[test]
    fn test_glob_patterns() {
        let filter = filter(&["node_modules", "*.tmp", "data/**"]);
        assert!(filter.is_ignored(Path::new("/srv/app/node_modules/left-pad/index.js")));
        assert!(filter.is_ignored(Path::new("/srv/app/build/cache.tmp")));
        assert!(filter.is_ignored(Path::new("/srv/app/data/db/000001.sst")));
        assert!(!filter.is_ignored(Path::new("/srv/app/src/main.rs")));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let filter = filter(&["[", "*.tmp"]);
        assert!(filter.is_ignored(Path::new("/srv/app/x.tmp")));
        assert!(!filter.is_ignored(Path::new("/srv/app/x.rs")));
    }

    #[tokio::test]
    async fn test_change_is_reported_once_per_burst() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let mut watcher = AppWatcher::start("api-0", WatchFilter::new(&root, &[], Vec::new())).unwrap();

        for i in 0..5 {
            std::fs::write(root.join(format!("file-{}.txt", i)), "changed").unwrap();
        }

        let changed = tokio::time::timeout(Duration::from_secs(5), watcher.changed())
            .await
            .unwrap();
        assert!(changed.is_some());

        // The burst was coalesced
        let again = tokio::time::timeout(Duration::from_millis(500), watcher.changed()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_change_survives_cancelled_wait() {
        let (sender, events) = mpsc::unbounded_channel();
        let mut changes = ChangeDebouncer::new(events);
        sender.send(PathBuf::from("/srv/app/main.go")).unwrap();

        // Dropped mid-debounce, as when another select! branch wins
        let cancelled = tokio::time::timeout(Duration::from_millis(50), changes.next()).await;
        assert!(cancelled.is_err());

        let changed = tokio::time::timeout(Duration::from_secs(1), changes.next())
            .await
            .unwrap();
        assert_eq!(changed, Some(PathBuf::from("/srv/app/main.go")));

        // Nothing else is queued
        let again = tokio::time::timeout(Duration::from_millis(300), changes.next()).await;
        assert!(again.is_err());
    }
}
