//! Database schema for the summary cache

/// SQL schema for the cache database
///
/// Timestamps are fixed-width RFC 3339 strings in UTC so that text
/// comparison orders them chronologically.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS summaries (
    cache_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_summaries_accessed ON summaries(last_accessed_at);
CREATE INDEX IF NOT EXISTS idx_summaries_expires ON summaries(expires_at);

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initializes the database schema and records its version
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO cache_meta (key, value) VALUES ('schema_version', ?1)",
        [get_schema_version().to_string()],
    )?;
    Ok(())
}

pub fn get_schema_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["summaries", "cache_meta"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }

        let version: String = conn
            .query_row(
                "SELECT value FROM cache_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
    }
}
