//! Per-file write locks for the mission directory
//!
//! Agents share one mission directory. Every write takes an exclusive lock on
//! its target path first; locks carry a TTL so a writer that dies mid-write
//! cannot wedge the file forever.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of a lock operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResult {
    /// Lock was acquired (or renewed by the same holder)
    Acquired { expires_at: DateTime<Utc> },

    /// Another writer holds the lock
    Denied {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Lock was released
    Released,

    /// The file was not locked
    NotLocked,
}

/// Information about an active lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub path: PathBuf,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Check if this lock has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// In-memory lock table keyed by mission-relative path
#[derive(Debug, Default)]
pub struct LockManager {
    locks: HashMap<PathBuf, LockInfo>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire a lock on a file
    ///
    /// Expired locks are taken over silently. The same holder acquiring again
    /// renews the expiry.
    pub fn acquire(&mut self, path: &Path, holder: &str, ttl: Duration) -> LockResult {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let expires_at = now + ttl;

        if let Some(existing) = self.locks.get(path) {
            if !existing.is_expired() && existing.holder != holder {
                return LockResult::Denied {
                    holder: existing.holder.clone(),
                    expires_at: existing.expires_at,
                };
            }
        }

        let acquired_at = match self.locks.get(path) {
            Some(existing) if !existing.is_expired() => existing.acquired_at,
            _ => now,
        };

        self.locks.insert(
            path.to_path_buf(),
            LockInfo {
                path: path.to_path_buf(),
                holder: holder.to_string(),
                acquired_at,
                expires_at,
            },
        );
        LockResult::Acquired { expires_at }
    }

    /// Release a lock; only the holder can release it
    pub fn release(&mut self, path: &Path, holder: &str) -> LockResult {
        match self.locks.get(path) {
            None => LockResult::NotLocked,
            Some(existing) if existing.is_expired() => {
                self.locks.remove(path);
                LockResult::NotLocked
            }
            Some(existing) if existing.holder == holder => {
                self.locks.remove(path);
                LockResult::Released
            }
            Some(existing) => LockResult::Denied {
                holder: existing.holder.clone(),
                expires_at: existing.expires_at,
            },
        }
    }

    /// Current (non-expired) lock on a path
    pub fn status(&self, path: &Path) -> Option<&LockInfo> {
        self.locks.get(path).filter(|info| !info.is_expired())
    }

    /// Drop expired locks, returning how many were removed
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, info| !info.is_expired());
        before - self.locks.len()
    }

    /// Number of active locks
    pub fn lock_count(&self) -> usize {
        self.locks.values().filter(|info| !info.is_expired()).count()
    }
}
