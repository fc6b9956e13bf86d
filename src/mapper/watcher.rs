//! Mission directory watching
//!
//! Raw filesystem events are debounced and converted into [`FileEvent`]
//! batches. Each batch is a signal to rebuild the project map; the events
//! themselves are informational.

use crate::Result;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Pending batches before the notify thread starts dropping them
const BATCH_CHANNEL_CAPACITY: usize = 100;

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// One change in the mission directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// Relative to the watched root
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Classify a debounced change
    ///
    /// The debouncer only reports that a path changed. A path that no longer
    /// exists was deleted; otherwise it is new unless the previous map knew it.
    pub fn classify(relative: &Path, exists: bool, known: &HashSet<PathBuf>) -> Self {
        let kind = if !exists {
            FileEventKind::Deleted
        } else if known.contains(relative) {
            FileEventKind::Modified
        } else {
            FileEventKind::Created
        };
        Self {
            path: relative.to_path_buf(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Paths the last map contained, shared with the watcher thread
pub type KnownPaths = Arc<RwLock<HashSet<PathBuf>>>;

/// Debounced recursive watch of a mission directory
///
/// Watching stops when this is dropped.
pub struct MapWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    root: PathBuf,
    known: KnownPaths,
}

impl MapWatcher {
    /// Start watching `root`, skipping anything under the `ignored` relative prefixes
    pub fn start(
        root: &Path,
        debounce: Duration,
        ignored: Vec<PathBuf>,
    ) -> Result<(Self, mpsc::Receiver<Vec<FileEvent>>)> {
        let root = root.canonicalize()?;
        let known: KnownPaths = Arc::new(RwLock::new(HashSet::new()));
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);

        let cb_root = root.clone();
        let cb_known = Arc::clone(&known);
        let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let known = cb_known.read().map(|k| k.clone()).unwrap_or_default();
                let mut seen = HashSet::new();
                let batch: Vec<FileEvent> = events
                    .iter()
                    .filter_map(|event| relative_to(&cb_root, &event.path))
                    .filter(|rel| !is_ignored(rel, &ignored))
                    .filter(|rel| seen.insert(rel.clone()))
                    .map(|rel| FileEvent::classify(&rel, cb_root.join(&rel).exists(), &known))
                    .collect();

                if batch.is_empty() {
                    return;
                }
                tracing::debug!(events = batch.len(), "File change batch");
                if tx.blocking_send(batch).is_err() {
                    tracing::debug!("Map watcher receiver dropped");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "File watcher error");
            }
        })?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        tracing::info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "Watching mission directory");

        Ok((
            Self {
                _debouncer: debouncer,
                root,
                known,
            },
            rx,
        ))
    }

    /// Canonical watched root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the set of paths considered already known
    pub fn set_known(&self, paths: HashSet<PathBuf>) {
        if let Ok(mut known) = self.known.write() {
            *known = paths;
        }
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_path_buf())
    }
}

fn is_ignored(relative: &Path, ignored: &[PathBuf]) -> bool {
    ignored.iter().any(|prefix| relative.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let known = HashSet::from([PathBuf::from("docs/a.md")]);

        let e = FileEvent::classify(Path::new("docs/a.md"), true, &known);
        assert_eq!(e.kind, FileEventKind::Modified);

        let e = FileEvent::classify(Path::new("docs/b.md"), true, &known);
        assert_eq!(e.kind, FileEventKind::Created);

        let e = FileEvent::classify(Path::new("docs/a.md"), false, &known);
        assert_eq!(e.kind, FileEventKind::Deleted);
    }

    #[test]
    fn test_ignored_prefixes() {
        let ignored = vec![PathBuf::from(".cadence"), PathBuf::from(".git")];
        assert!(is_ignored(Path::new(".cadence/phase.json"), &ignored));
        assert!(is_ignored(Path::new(".git/HEAD"), &ignored));
        assert!(!is_ignored(Path::new("docs/.cadence.md"), &ignored));
        assert!(!is_ignored(Path::new(".cadencex/file"), &ignored));
    }

    #[test]
    fn test_relative_to() {
        let root = Path::new("/m");
        assert_eq!(relative_to(root, Path::new("/m/docs/a.md")), Some(PathBuf::from("docs/a.md")));
        assert_eq!(relative_to(root, Path::new("/m")), None);
        assert_eq!(relative_to(root, Path::new("/other/a.md")), None);
    }

    #[tokio::test]
    #[ignore = "depends on platform filesystem notification timing"]
    async fn test_watch_reports_new_file() {
        let dir = TempDir::new().unwrap();
        let (_watcher, mut rx) =
            MapWatcher::start(dir.path(), Duration::from_millis(50), vec![]).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("new.md"), "hello").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch
            .iter()
            .any(|e| e.path == Path::new("new.md") && e.kind == FileEventKind::Created));
    }
}
