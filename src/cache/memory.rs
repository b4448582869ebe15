//! In-memory cache backend

use super::traits::{CacheBackend, CacheEntry, CacheResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Process-local backend, lost on exit
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, entry: &CacheEntry) -> CacheResult<()> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn touch(&mut self, key: &str, at: DateTime<Utc>) -> CacheResult<()> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed_at = at;
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - self.entries.len())
    }

    fn evict_lru(&mut self, max_entries: usize) -> CacheResult<usize> {
        if self.entries.len() <= max_entries {
            return Ok(0);
        }

        let mut by_access: Vec<(DateTime<Utc>, String)> = self
            .entries
            .values()
            .map(|entry| (entry.last_accessed_at, entry.key.clone()))
            .collect();
        by_access.sort();

        let excess = self.entries.len() - max_entries;
        for (_, key) in by_access.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        Ok(excess)
    }

    fn len(&self) -> CacheResult<usize> {
        Ok(self.entries.len())
    }

    fn clear(&mut self) -> CacheResult<usize> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lru_eviction_order() {
        let mut backend = MemoryCacheBackend::new();
        let base = Utc::now();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            let mut entry = CacheEntry::complete(*key, "x", Duration::from_secs(60));
            entry.last_accessed_at = base + chrono::Duration::seconds(i as i64);
            backend.put(&entry).unwrap();
        }

        assert_eq!(backend.evict_lru(1).unwrap(), 2);
        assert!(backend.get("c").unwrap().is_some());
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let mut backend = MemoryCacheBackend::new();
        let entry = CacheEntry::complete("k", "x", Duration::from_secs(1));
        let later = entry.created_at + chrono::Duration::seconds(5);
        backend.put(&entry).unwrap();

        assert_eq!(backend.purge_expired(later).unwrap(), 1);
        assert_eq!(backend.len().unwrap(), 0);
    }
}
