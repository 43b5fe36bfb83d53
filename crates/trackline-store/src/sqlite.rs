//! SQLite persistence backend using rusqlite.
//!
//! All collections share one table keyed by `(collection, id)`. Each record
//! is stored as JSON text next to its position, so `load_all` returns the
//! order the records were written in. Every batch write runs inside a single
//! transaction: a failure that rejects the batch leaves the collection as it
//! was.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use trackline_store::{CollectionProvider, SqliteStore};
//!
//! let store = SqliteStore::open("trackline.db").unwrap();
//! let goals = store.collection("goals");
//! let record = json!({ "id": "g1", "title": "Read more" });
//! goals.replace_all(vec![record.as_object().unwrap().clone()]).unwrap();
//!
//! assert_eq!(goals.load_all().unwrap().len(), 1);
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode, Transaction};
use trackline_migrate::{record_id, Record};
use tracing::{debug, info};

use crate::events::{ChangeKind, ChangeNotifier, CollectionChange};
use crate::traits::{CollectionProvider, ProviderError, RecordError, WriteSummary};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging, allows reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

impl std::str::FromStr for JournalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wal" => Ok(Self::Wal),
            "delete" => Ok(Self::Delete),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown journal mode `{other}`")),
        }
    }
}

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, ProviderError> {
    conn.lock().map_err(|_| ProviderError::LockPoisoned)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite database holding every collection.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex`; collection handles
/// returned by [`SqliteStore::collection`] share it.
pub struct SqliteStore {
    conn: SharedConnection,
    notifier: Arc<ChangeNotifier>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProviderError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, ProviderError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        info!(path = %path.as_ref().display(), "opened sqlite store");
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, ProviderError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            notifier: Arc::new(ChangeNotifier::new()),
        }
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), ProviderError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), ProviderError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trackline_records (
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                position    INTEGER NOT NULL,
                body        TEXT NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_position
                ON trackline_records(collection, position);",
        )?;
        Ok(())
    }

    /// Handle to one collection. Cheap; handles share the connection.
    pub fn collection(&self, name: impl Into<String>) -> SqliteCollection {
        SqliteCollection {
            name: name.into(),
            conn: Arc::clone(&self.conn),
            notifier: Arc::clone(&self.notifier),
        }
    }

    /// Notifier that every collection handle reports writes to.
    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Record count per stored collection, sorted by name.
    pub fn collection_counts(&self) -> Result<Vec<(String, u64)>, ProviderError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*) FROM trackline_records
             GROUP BY collection ORDER BY collection",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Get the database file size in bytes.
    pub fn file_size(&self) -> Result<u64, ProviderError> {
        let conn = lock(&self.conn)?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, ProviderError> {
        let conn = lock(&self.conn)?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

/// One collection inside a [`SqliteStore`].
pub struct SqliteCollection {
    name: String,
    conn: SharedConnection,
    notifier: Arc<ChangeNotifier>,
}

impl SqliteCollection {
    /// Insert or update one record at `position`. Constraint violations are
    /// reported as a record error; anything else aborts the batch.
    fn write_record(
        &self,
        tx: &Transaction<'_>,
        index: usize,
        position: i64,
        record: &Record,
    ) -> Result<Result<(), RecordError>, ProviderError> {
        let Some(id) = record_id(record) else {
            return Ok(Err(RecordError::new(format!("#{index}"), "record has no id")));
        };
        let body = match serde_json::to_string(record) {
            Ok(body) => body,
            Err(e) => return Ok(Err(RecordError::new(id, e.to_string()))),
        };
        let result = tx.execute(
            "INSERT INTO trackline_records (collection, id, position, body, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(collection, id)
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![self.name, id, position, body, now_ms()],
        );
        match result {
            Ok(_) => Ok(Ok(())),
            Err(rusqlite::Error::SqliteFailure(e, message))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                let reason = message.unwrap_or_else(|| e.to_string());
                Ok(Err(RecordError::new(id, reason)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, kind: ChangeKind, applied: usize) {
        self.notifier.notify(&CollectionChange {
            collection: self.name.clone(),
            kind,
            applied,
        });
    }
}

impl CollectionProvider for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_all(&self) -> Result<Vec<Record>, ProviderError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, body FROM trackline_records
             WHERE collection = ?1 ORDER BY position, id",
        )?;
        let rows = stmt
            .query_map(params![self.name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| {
                serde_json::from_str::<Record>(&body).map_err(|e| ProviderError::Corrupt {
                    collection: self.name.clone(),
                    id,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn replace_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM trackline_records WHERE collection = ?1",
            params![self.name],
        )?;

        let mut summary = WriteSummary::default();
        let mut seen = std::collections::HashSet::new();
        for (index, record) in records.iter().enumerate() {
            if let Some(id) = record_id(record) {
                if !seen.insert(id) {
                    summary
                        .errors
                        .push(RecordError::new(id, "duplicate id in batch"));
                    continue;
                }
            }
            match self.write_record(&tx, index, index as i64, record)? {
                Ok(()) => summary.applied += 1,
                Err(error) => summary.errors.push(error),
            }
        }
        tx.commit()?;
        drop(conn);

        debug!(
            collection = %self.name,
            applied = summary.applied,
            refused = summary.errors.len(),
            "replaced collection"
        );
        self.notify(ChangeKind::Replaced, summary.applied);
        Ok(summary)
    }

    fn merge_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM trackline_records WHERE collection = ?1",
            params![self.name],
            |row| row.get(0),
        )?;

        let mut summary = WriteSummary::default();
        for (index, record) in records.iter().enumerate() {
            match self.write_record(&tx, index, next + index as i64, record)? {
                Ok(()) => summary.applied += 1,
                Err(error) => summary.errors.push(error),
            }
        }
        tx.commit()?;
        drop(conn);

        debug!(
            collection = %self.name,
            applied = summary.applied,
            refused = summary.errors.len(),
            "merged collection"
        );
        self.notify(ChangeKind::Merged, summary.applied);
        Ok(summary)
    }
}

impl std::fmt::Debug for SqliteCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCollection")
            .field("name", &self.name)
            .finish()
    }
}
