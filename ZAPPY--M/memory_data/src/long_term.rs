use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::record::{MemoryRecord, Metadata, RecordId};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS memories (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
";

const SELECT_COLUMNS: &str = "SELECT id, content, metadata, created_at FROM memories";

/// Errors emitted by the long-term storage subsystem.
#[derive(Debug, Error)]
pub enum MemoryStorageError {
    /// SQLite failure (open, statement, or commit).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored row could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord {
        /// Raw id column.
        id: String,
        /// What failed to decode.
        reason: String,
    },
    /// The store was closed.
    #[error("long-term store is closed")]
    Closed,
}

/// SQLite-backed long-term memory.
///
/// Every mutation runs in autocommit mode with `synchronous = FULL`, so it is on
/// disk before the call returns.
#[derive(Debug)]
pub struct DurableStore {
    location: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl DurableStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryStorageError> {
        let location = path.as_ref().to_path_buf();
        if let Some(parent) = location.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&location)?;
        Self::from_connection(conn, location)
    }

    /// Opens a private in-memory database (tests, scratch runs).
    pub fn open_in_memory() -> Result<Self, MemoryStorageError> {
        Self::from_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, location: PathBuf) -> Result<Self, MemoryStorageError> {
        conn.execute_batch("PRAGMA synchronous = FULL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            location,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Database location.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Stores new content with a fresh id.
    pub fn add(
        &self,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryStorageError> {
        self.insert(MemoryRecord::new(content, metadata))
    }

    /// Persists a record evicted from short-term memory, keeping its id and creation
    /// time. Expiry is dropped.
    pub fn migrate(&self, mut record: MemoryRecord) -> Result<MemoryRecord, MemoryStorageError> {
        record.expires_at = None;
        self.insert(record)
    }

    fn insert(&self, record: MemoryRecord) -> Result<MemoryRecord, MemoryStorageError> {
        let meta = serde_json::to_string(&record.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (id, content, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id.to_string(),
                    record.content,
                    meta,
                    record.created_at.timestamp_micros()
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Loads a record by id.
    pub fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>, MemoryStorageError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    params![id.to_string()],
                    RawRow::from_row,
                )
                .optional()?;
            raw.map(RawRow::decode).transpose()
        })
    }

    /// Substring search over content and serialized metadata using SQLite `LIKE`.
    ///
    /// `%` and `_` in the query are matched literally. Results follow insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(query));
        self.collect(
            &format!(
                "{SELECT_COLUMNS} WHERE content LIKE ?1 ESCAPE '\\' OR metadata LIKE ?1 ESCAPE '\\' \
                 ORDER BY rowid LIMIT ?2"
            ),
            params![pattern, to_sql_limit(limit)],
        )
    }

    /// Deletes a record, returning whether it existed.
    pub fn delete(&self, id: &RecordId) -> Result<bool, MemoryStorageError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
            Ok(removed > 0)
        })
    }

    /// Most recent records first.
    pub fn all(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStorageError> {
        self.collect(
            &format!("{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?1"),
            params![to_sql_limit(limit)],
        )
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, MemoryStorageError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
            Ok(usize::try_from(total).unwrap_or_default())
        })
    }

    /// Releases the connection. Later calls fail with [`MemoryStorageError::Closed`].
    pub fn close(&self) -> Result<(), MemoryStorageError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, err)| MemoryStorageError::Sqlite(err))?;
        }
        Ok(())
    }

    /// Returns true once [`DurableStore::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    fn collect(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MemoryRecord>, MemoryStorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, RawRow::from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?.decode()?);
            }
            Ok(records)
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MemoryStorageError>,
    ) -> Result<T, MemoryStorageError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(MemoryStorageError::Closed)?;
        f(conn)
    }
}

struct RawRow {
    id: String,
    content: String,
    metadata: String,
    created_at: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            metadata: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<MemoryRecord, MemoryStorageError> {
        let corrupt = |reason: String| MemoryStorageError::CorruptRecord {
            id: self.id.clone(),
            reason,
        };
        let id = RecordId::parse_str(&self.id).map_err(|err| corrupt(err.to_string()))?;
        let created_at = Utc
            .timestamp_micros(self.created_at)
            .single()
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", self.created_at)))?;
        let metadata: Metadata = if self.metadata.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };
        Ok(MemoryRecord {
            id,
            content: self.content,
            metadata,
            created_at,
            expires_at: None,
        })
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
