//! In-memory collection provider.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use trackline_migrate::{record_id, Record};
use tracing::debug;

use crate::events::{ChangeKind, ChangeNotifier, CollectionChange};
use crate::traits::{CollectionProvider, ProviderError, RecordError, WriteSummary};

/// In-memory collection, primarily for tests and hosts that keep their own
/// persistence elsewhere.
///
/// Records keep insertion order. Optional unique-field constraints make the
/// provider refuse individual records, which is how a real backend reports
/// per-record failures.
pub struct MemoryCollection {
    name: String,
    records: Mutex<Vec<Record>>,
    unique_fields: Vec<String>,
    notifier: Option<Arc<ChangeNotifier>>,
}

impl MemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            unique_fields: Vec::new(),
            notifier: None,
        }
    }

    /// Seed the collection with records, bypassing all checks.
    pub fn with_records(self, records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            ..self
        }
    }

    /// Refuse records whose non-null `field` value is already held by
    /// another record.
    pub fn with_unique_field(mut self, field: impl Into<String>) -> Self {
        self.unique_fields.push(field.into());
        self
    }

    /// Report successful writes to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// True if the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Record>>, ProviderError> {
        self.records.lock().map_err(|_| ProviderError::LockPoisoned)
    }

    /// Name of the first unique field `record` collides on within `others`.
    fn unique_conflict<'r>(
        &self,
        record: &Record,
        id: &str,
        others: impl Iterator<Item = &'r Record> + Clone,
    ) -> Option<&str> {
        self.unique_fields.iter().map(String::as_str).find(|field| {
            let Some(value) = record.get(*field).filter(|v| !v.is_null()) else {
                return false;
            };
            others
                .clone()
                .any(|other| record_id(other) != Some(id) && other.get(*field) == Some(value))
        })
    }

    fn notify(&self, kind: ChangeKind, applied: usize) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&CollectionChange {
                collection: self.name.clone(),
                kind,
                applied,
            });
        }
    }
}

impl CollectionProvider for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_all(&self) -> Result<Vec<Record>, ProviderError> {
        Ok(self.lock()?.clone())
    }

    fn replace_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        let mut accepted: Vec<Record> = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let Some(id) = record_id(&record).map(str::to_owned) else {
                errors.push(RecordError::new(format!("#{index}"), "record has no id"));
                continue;
            };
            if !seen.insert(id.clone()) {
                errors.push(RecordError::new(id, "duplicate id in batch"));
                continue;
            }
            if let Some(field) = self.unique_conflict(&record, &id, accepted.iter()) {
                errors.push(RecordError::new(
                    id,
                    format!("unique constraint violated on `{field}`"),
                ));
                continue;
            }
            accepted.push(record);
        }

        let applied = accepted.len();
        *self.lock()? = accepted;
        debug!(collection = %self.name, applied, refused = errors.len(), "replaced collection");
        self.notify(ChangeKind::Replaced, applied);
        Ok(WriteSummary { applied, errors })
    }

    fn merge_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        let mut stored = self.lock()?;
        let mut applied = 0;
        let mut errors = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let Some(id) = record_id(&record).map(str::to_owned) else {
                errors.push(RecordError::new(format!("#{index}"), "record has no id"));
                continue;
            };
            if let Some(field) = self.unique_conflict(&record, &id, stored.iter()) {
                errors.push(RecordError::new(
                    id,
                    format!("unique constraint violated on `{field}`"),
                ));
                continue;
            }
            match stored
                .iter_mut()
                .find(|existing| record_id(existing) == Some(id.as_str()))
            {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
            applied += 1;
        }
        drop(stored);

        debug!(collection = %self.name, applied, refused = errors.len(), "merged collection");
        self.notify(ChangeKind::Merged, applied);
        Ok(WriteSummary { applied, errors })
    }

    fn current_sensitive_value(&self, field: &str) -> Result<Option<Value>, ProviderError> {
        Ok(self
            .lock()?
            .iter()
            .find_map(|record| record.get(field).filter(|v| !v.is_null()).cloned()))
    }
}

impl std::fmt::Debug for MemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCollection")
            .field("name", &self.name)
            .field("records", &self.len())
            .field("unique_fields", &self.unique_fields)
            .finish()
    }
}
