//! Durable summary cache with two-phase commit
//!
//! Generated output never touches the durable store until the whole
//! summarization has succeeded. While generating, text lives in a
//! request-scoped [`TransientBuffer`]; [`SummaryCache::commit`] then writes
//! payload and completion marker in one transaction. Readers treat any row
//! without the marker as a miss and delete it.
//!
//! Identical concurrent requests are coalesced in-process by
//! [`SummaryCache::dedup_or_generate`].

mod key;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use key::{CacheKey, ConfigFingerprint};
pub use memory::MemoryCacheBackend;
pub use sqlite::SqliteCacheBackend;
pub use traits::{CacheBackend, CacheEntry, CacheError, CacheResult};

use crate::coalesce::Coalescer;
use crate::config::CacheConfig;
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Request-scoped accumulation of generated text
///
/// Never written to a backend; [`TransientBuffer::into_payload`] hands the
/// finished text to the caller, who commits it.
#[derive(Debug, Default)]
pub struct TransientBuffer {
    text: String,
}

impl TransientBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, piece: &str) {
        self.text.push_str(piece);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_payload(self) -> String {
        self.text
    }
}

/// A summary and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSummary {
    pub payload: String,
    /// Served from the durable cache rather than generated by this request
    pub hit: bool,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub commits: u64,
    /// Rows found without a completion marker
    pub inconsistencies: u64,
    /// Callers that joined an identical in-flight generation
    pub joined: u64,
}

struct Store {
    backend: Mutex<Box<dyn CacheBackend>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    commits: AtomicU64,
    inconsistencies: AtomicU64,
}

impl Store {
    fn backend(&self) -> std::sync::MutexGuard<'_, Box<dyn CacheBackend>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads fail closed: errors, expired rows and incomplete rows are misses
    fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut backend = self.backend();
        let now = Utc::now();

        let entry = match backend.get(key.as_str()) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(key = %key, "Cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        if !entry.complete {
            self.inconsistencies.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, "Cache entry without completion marker, discarding");
            if let Err(e) = backend.remove(key.as_str()) {
                tracing::warn!(key = %key, "Failed to remove incomplete cache entry: {}", e);
            }
            return None;
        }

        if entry.is_expired(now) {
            tracing::debug!(key = %key, "Cache entry expired");
            if let Err(e) = backend.remove(key.as_str()) {
                tracing::warn!(key = %key, "Failed to remove expired cache entry: {}", e);
            }
            return None;
        }

        if let Err(e) = backend.touch(key.as_str(), now) {
            tracing::debug!(key = %key, "Failed to update cache access time: {}", e);
        }
        Some(entry)
    }

    fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.read(key);
        let counter = if entry.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        entry
    }

    fn commit(&self, key: &CacheKey, payload: &str) -> CacheResult<()> {
        let entry = CacheEntry::complete(key.as_str(), payload, self.ttl);
        let mut backend = self.backend();
        backend.put(&entry)?;
        self.commits.fetch_add(1, Ordering::Relaxed);

        let expired = backend.purge_expired(entry.created_at)?;
        let evicted = backend.evict_lru(self.max_entries)?;
        tracing::debug!(key = %key, expired, evicted, "Committed summary");
        Ok(())
    }
}

/// Summary cache shared by all requests of a pipeline
///
/// `E` is the error type of the generation function passed to
/// [`SummaryCache::dedup_or_generate`].
pub struct SummaryCache<E> {
    store: Arc<Store>,
    inflight: Coalescer<CacheKey, CachedSummary, E>,
}

impl<E> SummaryCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(backend: Box<dyn CacheBackend>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: Arc::new(Store {
                backend: Mutex::new(backend),
                ttl,
                max_entries: max_entries.max(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                inconsistencies: AtomicU64::new(0),
            }),
            inflight: Coalescer::new(),
        }
    }

    /// Opens the SQLite cache described by `[cache]`
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let backend = SqliteCacheBackend::new(Path::new(&config.database_path))?;
        Ok(Self::new(Box::new(backend), config.ttl(), config.max_entries))
    }

    pub fn in_memory(ttl: Duration, max_entries: usize) -> Self {
        Self::new(Box::new(MemoryCacheBackend::new()), ttl, max_entries)
    }

    /// Returns a complete, unexpired entry or `None`
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.store.lookup(key)
    }

    /// Atomically stores a finished summary
    pub fn commit(&self, key: &CacheKey, payload: &str) -> CacheResult<()> {
        self.store.commit(key, payload)
    }

    /// Serves `key` from the cache, joins an identical in-flight generation,
    /// or runs `generate` and commits its result
    ///
    /// `generate` runs at most once per key at a time. If every caller is
    /// dropped before it finishes, the generation is cancelled and nothing
    /// is written. A failed commit is logged and the generated text is still
    /// returned.
    pub async fn dedup_or_generate<F, Fut>(&self, key: &CacheKey, generate: F) -> Result<CachedSummary, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>> + Send + 'static,
    {
        if let Some(entry) = self.get(key) {
            return Ok(CachedSummary {
                payload: entry.payload,
                hit: true,
            });
        }

        let store = Arc::clone(&self.store);
        let leader_key = key.clone();
        self.inflight
            .run(key.clone(), move || {
                let generation = generate();
                async move {
                    // Another leader may have committed while this one was queued
                    if let Some(entry) = store.read(&leader_key) {
                        store.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(CachedSummary {
                            payload: entry.payload,
                            hit: true,
                        });
                    }

                    let payload = generation.await?;
                    if let Err(e) = store.commit(&leader_key, &payload) {
                        tracing::warn!(key = %leader_key, "Failed to commit summary: {}", e);
                    }
                    Ok(CachedSummary {
                        payload,
                        hit: false,
                    })
                }
            })
            .await
    }

    /// Applies TTL expiry and the size bound, returning how many rows went
    pub fn purge(&self) -> CacheResult<usize> {
        let mut backend = self.store.backend();
        let expired = backend.purge_expired(Utc::now())?;
        let evicted = backend.evict_lru(self.store.max_entries)?;
        Ok(expired + evicted)
    }

    /// Deletes every entry
    pub fn clear(&self) -> CacheResult<usize> {
        self.store.backend().clear()
    }

    pub fn len(&self) -> CacheResult<usize> {
        self.store.backend().len()
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.store.hits.load(Ordering::Relaxed),
            misses: self.store.misses.load(Ordering::Relaxed),
            commits: self.store.commits.load(Ordering::Relaxed),
            inconsistencies: self.store.inconsistencies.load(Ordering::Relaxed),
            joined: self.inflight.joined(),
        }
    }
}
