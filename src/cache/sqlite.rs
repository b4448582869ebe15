//! SQLite cache backend

use super::schema::initialize_schema;
use super::traits::{CacheBackend, CacheEntry, CacheError, CacheResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQLite cache backend
pub struct SqliteCacheBackend {
    conn: Connection,
}

impl SqliteCacheBackend {
    /// Opens or creates the cache database at `path`
    pub fn new(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> CacheResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CacheError::Database(format!("Invalid timestamp {:?}: {}", raw, e)))
}

struct RawEntry {
    key: String,
    payload: String,
    complete: bool,
    created_at: String,
    last_accessed_at: String,
    ttl_secs: i64,
}

impl CacheBackend for SqliteCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let raw = self
            .conn
            .query_row(
                "SELECT cache_key, payload, complete, created_at, last_accessed_at, ttl_secs
                 FROM summaries WHERE cache_key = ?1",
                params![key],
                |row| {
                    Ok(RawEntry {
                        key: row.get(0)?,
                        payload: row.get(1)?,
                        complete: row.get::<_, i64>(2)? != 0,
                        created_at: row.get(3)?,
                        last_accessed_at: row.get(4)?,
                        ttl_secs: row.get(5)?,
                    })
                },
            )
            .optional()?;

        raw.map(|raw| {
            Ok(CacheEntry {
                key: raw.key,
                payload: raw.payload,
                complete: raw.complete,
                created_at: parse_timestamp(&raw.created_at)?,
                last_accessed_at: parse_timestamp(&raw.last_accessed_at)?,
                ttl: Duration::from_secs(raw.ttl_secs.max(0) as u64),
            })
        })
        .transpose()
    }

    fn put(&mut self, entry: &CacheEntry) -> CacheResult<()> {
        let ttl_secs = entry.ttl.as_secs().min(i64::MAX as u64) as i64;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO summaries
             (cache_key, payload, complete, created_at, last_accessed_at, expires_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.key,
                entry.payload,
                entry.complete as i64,
                format_timestamp(entry.created_at),
                format_timestamp(entry.last_accessed_at),
                format_timestamp(entry.expires_at()),
                ttl_secs
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn touch(&mut self, key: &str, at: DateTime<Utc>) -> CacheResult<()> {
        self.conn.execute(
            "UPDATE summaries SET last_accessed_at = ?1 WHERE cache_key = ?2",
            params![format_timestamp(at), key],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CacheResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM summaries WHERE cache_key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> CacheResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM summaries WHERE expires_at <= ?1",
            params![format_timestamp(now)],
        )?;
        Ok(removed)
    }

    fn evict_lru(&mut self, max_entries: usize) -> CacheResult<usize> {
        let count = self.len()?;
        if count <= max_entries {
            return Ok(0);
        }

        let excess = (count - max_entries) as i64;
        let removed = self.conn.execute(
            "DELETE FROM summaries WHERE cache_key IN (
                SELECT cache_key FROM summaries ORDER BY last_accessed_at ASC LIMIT ?1
            )",
            params![excess],
        )?;
        Ok(removed)
    }

    fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn clear(&mut self) -> CacheResult<usize> {
        Ok(self.conn.execute("DELETE FROM summaries", [])?)
    }
}
