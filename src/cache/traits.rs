//! Cache backend trait and error types

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// A stored summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    /// Completion marker; entries without it are never served
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// A finished entry created now
    pub fn complete(key: impl Into<String>, payload: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            payload: payload.into(),
            complete: true,
            created_at: now,
            last_accessed_at: now,
            ttl,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Durable key/value storage for summaries
///
/// Implementations must write an entry's payload and completion marker in
/// one atomic step.
pub trait CacheBackend: Send {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Inserts or replaces the whole entry
    fn put(&mut self, entry: &CacheEntry) -> CacheResult<()>;

    /// Records a read for LRU ordering
    fn touch(&mut self, key: &str, at: DateTime<Utc>) -> CacheResult<()>;

    fn remove(&mut self, key: &str) -> CacheResult<bool>;

    /// Deletes entries whose TTL has passed
    fn purge_expired(&mut self, now: DateTime<Utc>) -> CacheResult<usize>;

    /// Deletes least recently used entries until at most `max_entries` remain
    fn evict_lru(&mut self, max_entries: usize) -> CacheResult<usize>;

    fn len(&self) -> CacheResult<usize>;

    fn clear(&mut self) -> CacheResult<usize>;
}
