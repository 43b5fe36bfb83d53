use serde::{Deserialize, Serialize};
use serde_json::Value;
use trackline_migrate::Record;

/// Why one record was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    /// The record's id, or `#<index>` when it has none.
    pub record_id: String,
    /// Human-readable reason.
    pub reason: String,
}

impl RecordError {
    /// Create a record error.
    pub fn new(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result of a batch write that the provider accepted as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Records written.
    pub applied: usize,
    /// Records the provider refused, one entry each.
    pub errors: Vec<RecordError>,
}

/// Error that rejects a whole provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Error from the SQLite backend.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A lock guarding the collection was poisoned.
    #[error("collection lock poisoned")]
    LockPoisoned,
    /// A stored record could not be decoded.
    #[error("corrupt record `{id}` in `{collection}`: {reason}")]
    Corrupt {
        collection: String,
        id: String,
        reason: String,
    },
    /// The backend refused the operation.
    #[error("{0}")]
    Rejected(String),
}

/// The capability every entity subsystem implements so its records can be
/// backed up and restored.
///
/// Implementations use interior mutability: handles are shared between the
/// host application and the backup core.
pub trait CollectionProvider: Send + Sync {
    /// Stable collection name (e.g. `"goals"`).
    fn name(&self) -> &str;

    /// All records, including inactive / soft-deleted ones, in display order.
    fn load_all(&self) -> Result<Vec<Record>, ProviderError>;

    /// Discard the collection's contents and write `records`.
    fn replace_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError>;

    /// Upsert `records` by `id`; records not in the batch are left untouched.
    fn merge_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError>;

    /// The locally configured value of a sensitive field, if any.
    ///
    /// Intended for configuration-style singleton collections. The default
    /// returns the first non-null value of `field` across stored records.
    fn current_sensitive_value(&self, field: &str) -> Result<Option<Value>, ProviderError> {
        Ok(self
            .load_all()?
            .into_iter()
            .find_map(|mut record| record.remove(field).filter(|v| !v.is_null())))
    }
}
