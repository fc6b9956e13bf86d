//! Shared mission-directory file store
//!
//! Every agent reads and writes the same mission directory. The store owns the
//! concurrency story for that shared resource: per-path write locks with TTLs,
//! retry on contention, and atomic replace so readers never observe a partial
//! write. An agent's edit holds a lease on its target files for the whole run
//! of the edit tool, so two agents never edit the same document at once.
//!
//! All paths handed to and returned from a store are relative to its root.

pub mod locks;
pub mod retry;

use crate::error::CadenceError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use locks::{LockInfo, LockManager, LockResult};
pub use retry::{with_retry, RetryConfig, RetryDecision, RetryableError};

/// Default TTL for a write lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default TTL for the locks of an edit lease; outlives any sane edit tool run
pub const DEFAULT_EDIT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// File access used by agents and their work policies
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a whole file; `CadenceError::NotFound` if it does not exist
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace a file's contents atomically, creating parent directories
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Files matching a glob relative to the root, sorted
    async fn list_files(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Last modification time, `None` if the file does not exist
    async fn modified_at(&self, path: &Path) -> Result<Option<DateTime<Utc>>>;

    /// Lock every path in `paths` for `holder` until the lease is dropped
    ///
    /// All or nothing: on contention that outlasts the retry policy nothing
    /// stays locked and the error is `CadenceError::LockConflict`.
    async fn lock_paths(&self, paths: &[PathBuf], holder: &str) -> Result<EditLease>;
}

/// File store backed by a local directory
#[derive(Debug)]
pub struct LocalFileStore {
    root: PathBuf,
    locks: Arc<Mutex<LockManager>>,
    lock_ttl: Duration,
    edit_lock_ttl: Duration,
    retry: RetryConfig,
    writer_seq: AtomicU64,
}

impl LocalFileStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(LockManager::new())),
            lock_ttl: DEFAULT_LOCK_TTL,
            edit_lock_ttl: DEFAULT_EDIT_LOCK_TTL,
            retry: RetryConfig::default(),
            writer_seq: AtomicU64::new(1),
        }
    }

    /// Set the retry policy for contended writes
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the write lock TTL
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the TTL of locks taken for an edit lease
    pub fn with_edit_lock_ttl(mut self, ttl: Duration) -> Self {
        self.edit_lock_ttl = ttl;
        self
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of write locks currently held
    pub fn active_lock_count(&self) -> usize {
        self.locks.lock().map(|l| l.lock_count()).unwrap_or(0)
    }

    /// Take the write lock on `path` for `holder` and hold it for the returned guard's life
    pub fn lock(&self, path: &Path, holder: &str) -> Result<WriteGuard> {
        self.lock_for(path, holder, self.lock_ttl)
    }

    fn lock_for(&self, path: &Path, holder: &str, ttl: Duration) -> Result<WriteGuard> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CadenceError::Other("lock table poisoned".to_string()))?;
        locks.cleanup_expired();
        match locks.acquire(path, holder, ttl) {
            LockResult::Denied { holder: owner, expires_at } => Err(CadenceError::LockConflict {
                path: path.to_path_buf(),
                holder: owner,
                expires_at: expires_at.to_rfc3339(),
            }),
            _ => Ok(WriteGuard {
                locks: Arc::clone(&self.locks),
                path: path.to_path_buf(),
                holder: holder.to_string(),
            }),
        }
    }

    fn try_lock_all(&self, paths: &[PathBuf], holder: &str) -> Result<EditLease> {
        let mut lease = EditLease::default();
        for path in paths {
            self.resolve(path)?;
            // A failure drops the lease, releasing what was already taken
            lease.guards.push(self.lock_for(path, holder, self.edit_lock_ttl)?);
        }
        Ok(lease)
    }

    /// Resolve a root-relative path, refusing anything that escapes the root
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                CadenceError::Other(format!(
                    "Path {} is outside the mission directory",
                    path.display()
                ))
            })?
        } else {
            path
        };

        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(CadenceError::Other(format!(
                "Path {} escapes the mission directory",
                path.display()
            )));
        }

        Ok(self.root.join(relative))
    }

    fn try_write(&self, path: &Path, contents: &[u8], holder: &str) -> Result<()> {
        let full = self.resolve(path)?;
        let _guard = self.lock(path, holder)?;

        let parent = full
            .parent()
            .ok_or_else(|| CadenceError::Other(format!("No parent for {}", full.display())))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&full).map_err(|e| CadenceError::Io(e.error))?;

        tracing::trace!(path = %path.display(), bytes = contents.len(), "File written");
        Ok(())
    }
}

/// Releases a write lock when dropped
#[derive(Debug)]
pub struct WriteGuard {
    locks: Arc<Mutex<LockManager>>,
    path: PathBuf,
    holder: String,
}

impl WriteGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.release(&self.path, &self.holder);
        }
    }
}

/// Locks held for one edit; all released on drop
#[derive(Debug, Default)]
pub struct EditLease {
    guards: Vec<WriteGuard>,
}

impl EditLease {
    /// Locked paths, in locking order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.guards.iter().map(WriteGuard::path)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                CadenceError::NotFound(path.to_path_buf())
            } else {
                CadenceError::Io(e)
            }
        })
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let holder = format!("writer-{}", self.writer_seq.fetch_add(1, Ordering::Relaxed));
        let holder = holder.as_str();
        with_retry(&self.retry, "write_file", || async move {
            self.try_write(path, contents, holder)
        })
        .await
    }

    async fn list_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        // Validate the agent-supplied part on its own so errors point at it
        glob::Pattern::new(pattern)?;

        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let full_pattern = format!("{}/{}", root.trim_end_matches('/'), pattern);

        let mut files = Vec::new();
        for entry in glob::glob(&full_pattern)? {
            match entry {
                Ok(path) if path.is_file() => {
                    if let Ok(rel) = path.strip_prefix(&self.root) {
                        files.push(rel.to_path_buf());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable glob entry");
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn modified_at(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        let full = self.resolve(path)?;
        match std::fs::metadata(&full) {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_paths(&self, paths: &[PathBuf], holder: &str) -> Result<EditLease> {
        let lease = with_retry(&self.retry, "lock_paths", || async move {
            self.try_lock_all(paths, holder)
        })
        .await?;
        tracing::trace!(holder, paths = lease.len(), "Edit lease taken");
        Ok(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalFileStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = store();

        store
            .write_file(Path::new("docs/intro.md"), b"# Intro")
            .await
            .unwrap();

        let bytes = store.read_file(Path::new("docs/intro.md")).await.unwrap();
        assert_eq!(bytes, b"# Intro");
        assert_eq!(store.active_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.read_file(Path::new("nope.md")).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(p) if p == Path::new("nope.md")));
    }

    #[tokio::test]
    async fn test_list_files_relative_and_sorted() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("docs/guide")).unwrap();
        std::fs::write(dir.path().join("docs/b.md"), "b").unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("docs/guide/c.md"), "c").unwrap();
        std::fs::write(dir.path().join("docs/notes.txt"), "n").unwrap();

        let files = store.list_files("docs/**/*.md").await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("docs/a.md"),
                PathBuf::from("docs/b.md"),
                PathBuf::from("docs/guide/c.md"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files_bad_pattern() {
        let (_dir, store) = store();
        let err = store.list_files("docs/[").await.unwrap_err();
        assert!(matches!(err, CadenceError::Pattern(_)));
    }

    #[tokio::test]
    async fn test_modified_at() {
        let (dir, store) = store();
        assert!(store.modified_at(Path::new("a.md")).await.unwrap().is_none());

        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        assert!(store.modified_at(Path::new("a.md")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_escaping_paths_rejected() {
        let (_dir, store) = store();
        assert!(store.read_file(Path::new("../etc/passwd")).await.is_err());
        assert!(store
            .write_file(Path::new("/etc/cadence-test"), b"x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_write_blocked_by_foreign_lock() {
        let (_dir, store) = store();
        let store = store.with_retry(RetryConfig::none());
        let path = Path::new("docs/a.md");

        let guard = store.lock(path, "reviewer").unwrap();
        let err = store.write_file(path, b"x").await.unwrap_err();
        assert!(matches!(err, CadenceError::LockConflict { ref holder, .. } if holder == "reviewer"));
        assert!(err.is_transient());

        drop(guard);
        store.write_file(path, b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_paths_all_or_nothing() {
        let (_dir, store) = store();
        let store = store.with_retry(RetryConfig::none());
        let paths = vec![PathBuf::from("docs/a.md"), PathBuf::from("docs/b.md")];

        let foreign = store.lock(Path::new("docs/b.md"), "reviewer").unwrap();
        let err = store.lock_paths(&paths, "writer").await.unwrap_err();
        assert!(matches!(err, CadenceError::LockConflict { ref path, .. } if path == Path::new("docs/b.md")));
        // docs/a.md was released again
        assert_eq!(store.active_lock_count(), 1);

        drop(foreign);
        let lease = store.lock_paths(&paths, "writer").await.unwrap();
        assert_eq!(lease.paths().collect::<Vec<_>>(), vec![Path::new("docs/a.md"), Path::new("docs/b.md")]);
        assert_eq!(store.active_lock_count(), 2);

        // Writes by anyone else wait for the lease
        assert!(store.write_file(Path::new("docs/a.md"), b"x").await.is_err());
        drop(lease);
        assert_eq!(store.active_lock_count(), 0);
        store.write_file(Path::new("docs/a.md"), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_paths_rejects_escaping_path() {
        let (_dir, store) = store();
        let err = store
            .lock_paths(&[PathBuf::from("../outside.md")], "writer")
            .await
            .unwrap_err();
        assert!(!matches!(err, CadenceError::LockConflict { .. }));
        assert_eq!(store.active_lock_count(), 0);
    }
}
