//! Schema creation and version tracking.

use rusqlite::{params, Connection, OptionalExtension};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            department TEXT,
            active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS embeddings (
            user_id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS attendance (
            record_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_name TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            confidence REAL NOT NULL,
            liveness_verified INTEGER NOT NULL,
            quality_score REAL NOT NULL,
            processing_time_ms INTEGER NOT NULL,
            verification_stage TEXT NOT NULL,
            session_id TEXT NOT NULL,
            device_info TEXT,
            location TEXT
        );
        CREATE INDEX IF NOT EXISTS attendance_user_date_idx ON attendance(user_id, date);
        COMMIT;",
    )
}

/// Stored schema version; 0 when the database predates version tracking.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    let version: Option<String> = conn
        .query_row("SELECT value FROM metadata WHERE key = 'schema_version'", [], |r| r.get(0))
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

pub(crate) fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        params![version.to_string()],
    )?;
    Ok(())
}
