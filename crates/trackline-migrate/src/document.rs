use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single record: field name to JSON value.
///
/// Field order is preserved so that a record survives export and import
/// unchanged.
pub type Record = serde_json::Map<String, Value>;

/// Stable identifier field carried by every record.
pub const ID_FIELD: &str = "id";

/// Display-sequence hint on collections that support ordering.
pub const ORDER_FIELD: &str = "order";

/// Returns the record's `id` if it is a string.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

/// The portable backup document.
///
/// Wire format:
/// ```text
/// {
///   "schemaVersion": 3,
///   "exportedAt": "2026-01-01T00:00:00Z",
///   "collections": { "goals": [ {...}, ... ], ... }
/// }
/// ```
///
/// # Example
///
/// ```
/// use trackline_migrate::{BackupDocument, Record};
///
/// let mut goal = Record::new();
/// goal.insert("id".into(), "g1".into());
///
/// let doc = BackupDocument::new(3).with_collection("goals", vec![goal]);
/// let bytes = doc.to_vec(false).unwrap();
///
/// assert_eq!(BackupDocument::peek_version(&bytes), Some(3));
/// let decoded = BackupDocument::from_slice(&bytes).unwrap();
/// assert_eq!(decoded, doc);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    /// Schema version the records are written in.
    pub schema_version: u32,
    /// When the document was produced.
    pub exported_at: DateTime<Utc>,
    /// Collection name to ordered records.
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Record>>,
}

impl BackupDocument {
    /// Create an empty document stamped with the current time.
    pub fn new(schema_version: u32) -> Self {
        Self {
            schema_version,
            exported_at: Utc::now(),
            collections: BTreeMap::new(),
        }
    }

    /// Add (or replace) a collection.
    pub fn with_collection(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.collections.insert(name.into(), records);
        self
    }

    /// Records of a collection, if the document carries it.
    pub fn collection(&self, name: &str) -> Option<&[Record]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Total number of records across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Decode a document that has already passed validation.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Decode a document from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode the document as JSON.
    pub fn to_vec(&self, pretty: bool) -> Result<Vec<u8>, serde_json::Error> {
        if pretty {
            serde_json::to_vec_pretty(self)
        } else {
            serde_json::to_vec(self)
        }
    }

    /// Read the declared `schemaVersion` without decoding the records.
    ///
    /// Returns `None` for anything that is not a JSON object with an
    /// unsigned integer `schemaVersion`.
    pub fn peek_version(bytes: &[u8]) -> Option<u32> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Header {
            schema_version: u32,
        }
        serde_json::from_slice::<Header>(bytes)
            .ok()
            .map(|h| h.schema_version)
    }
}
