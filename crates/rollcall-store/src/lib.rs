//! rollcall-store — SQLite persistence for users, enrolled embeddings and
//! attendance records.
//!
//! One [`SqliteStore`] implements all three rollcall-core store traits.
//! Dates and times are stored as ISO-8601 text so range queries compare
//! lexicographically.

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::{
    AttendanceRecord, AttendanceStore, DateRange, Embedding, KnownEmbeddingsStore, StoreError,
    StoredEmbedding, User, UserStore,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub mod schema;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

fn query_err(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.as_ref().display())))?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(query_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(query_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        schema::init_schema(conn).map_err(query_err)?;
        let version = schema::schema_version(conn).map_err(query_err)?;
        if version > schema::CURRENT_SCHEMA_VERSION {
            return Err(StoreError::Unavailable(format!(
                "database schema version {version} is newer than supported version {}",
                schema::CURRENT_SCHEMA_VERSION
            )));
        }
        if version < schema::CURRENT_SCHEMA_VERSION {
            schema::set_schema_version(conn, schema::CURRENT_SCHEMA_VERSION).map_err(query_err)?;
            tracing::info!(from = version, to = schema::CURRENT_SCHEMA_VERSION, "store schema migrated");
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".into()))
    }

    /// Insert or replace a user profile.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO users (user_id, name, email, department, active)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.user_id, user.name, user.email, user.department, user.active],
            )
            .map_err(query_err)?;
        Ok(())
    }

    /// Store an enrolled embedding in the typed payload shape, replacing any
    /// earlier enrollment for the user.
    pub fn put_embedding(&self, user_id: &str, name: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "name": name, "embedding": embedding });
        self.put_raw_embedding(user_id, &payload)
    }

    /// Store an arbitrary payload as-is. The gallery loader decides later
    /// whether it is a shape it understands.
    pub fn put_raw_embedding(&self, user_id: &str, payload: &serde_json::Value) -> Result<(), StoreError> {
        let now = chrono::Local::now().naive_local().to_string();
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO embeddings (user_id, payload, updated_at) VALUES (?1, ?2, ?3)",
                params![user_id, payload.to_string(), now],
            )
            .map_err(query_err)?;
        tracing::debug!(user_id, "embedding stored");
        Ok(())
    }

    pub fn remove_embedding(&self, user_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM embeddings WHERE user_id = ?1", params![user_id])
            .map_err(query_err)?;
        Ok(removed > 0)
    }

    /// Number of users with an enrolled embedding.
    pub fn enrolled_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))
            .map_err(query_err)?;
        Ok(n as usize)
    }
}

impl KnownEmbeddingsStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT user_id, payload FROM embeddings ORDER BY user_id")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(query_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, text) = row.map_err(query_err)?;
            match serde_json::from_str(&text) {
                Ok(payload) => entries.push(StoredEmbedding { user_id, payload }),
                Err(e) => tracing::warn!(user_id = %user_id, error = %e, "embedding payload is not JSON; skipping"),
            }
        }
        Ok(entries)
    }
}

impl UserStore for SqliteStore {
    fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.lock()?
            .query_row(
                "SELECT user_id, name, email, department, active FROM users WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(User {
                        user_id: r.get(0)?,
                        name: r.get(1)?,
                        email: r.get(2)?,
                        department: r.get(3)?,
                        active: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }
}

impl AttendanceStore for SqliteStore {
    fn add(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT INTO attendance (
                    record_id, user_id, user_name, date, time, confidence, liveness_verified,
                    quality_score, processing_time_ms, verification_stage, session_id,
                    device_info, location
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.record_id,
                    record.user_id,
                    record.user_name,
                    record.date.format(DATE_FORMAT).to_string(),
                    record.time.format(TIME_FORMAT).to_string(),
                    record.confidence as f64,
                    record.liveness_verified,
                    record.quality_score as f64,
                    record.processing_time_ms as i64,
                    record.verification_stage,
                    record.session_id,
                    record.device_info,
                    record.location,
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn history(&self, user_id: &str, range: &DateRange) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_id, user_id, user_name, date, time, confidence, liveness_verified,
                        quality_score, processing_time_ms, verification_stage, session_id,
                        device_info, location
                 FROM attendance
                 WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3
                 ORDER BY date, time",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    range.start.format(DATE_FORMAT).to_string(),
                    range.end.format(DATE_FORMAT).to_string(),
                ],
                row_to_record,
            )
            .map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)??);
        }
        Ok(records)
    }

    fn count(&self, user_id: &str, range: &DateRange) -> Result<usize, StoreError> {
        let n: i64 = self
            .lock()?
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3",
                params![
                    user_id,
                    range.start.format(DATE_FORMAT).to_string(),
                    range.end.format(DATE_FORMAT).to_string(),
                ],
                |r| r.get(0),
            )
            .map_err(query_err)?;
        Ok(n as usize)
    }
}

/// Decode one attendance row. Text columns that fail to parse as a date or
/// time surface as [`StoreError::Corrupt`] rather than a SQL error.
fn row_to_record(r: &Row<'_>) -> rusqlite::Result<Result<AttendanceRecord, StoreError>> {
    let record_id: String = r.get(0)?;
    let date: String = r.get(3)?;
    let time: String = r.get(4)?;

    let Ok(date) = NaiveDate::parse_from_str(&date, DATE_FORMAT) else {
        return Ok(Err(StoreError::Corrupt(format!("record {record_id}: bad date {date:?}"))));
    };
    let Ok(time) = NaiveTime::parse_from_str(&time, TIME_FORMAT) else {
        return Ok(Err(StoreError::Corrupt(format!("record {record_id}: bad time {time:?}"))));
    };

    Ok(Ok(AttendanceRecord {
        record_id,
        user_id: r.get(1)?,
        user_name: r.get(2)?,
        date,
        time,
        confidence: r.get::<_, f64>(5)? as f32,
        liveness_verified: r.get(6)?,
        quality_score: r.get::<_, f64>(7)? as f32,
        processing_time_ms: r.get::<_, i64>(8)?.max(0) as u64,
        verification_stage: r.get(9)?,
        session_id: r.get(10)?,
        device_info: r.get(11)?,
        location: r.get(12)?,
    }))
}
