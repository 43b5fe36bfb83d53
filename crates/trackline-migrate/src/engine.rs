use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::document::{record_id, BackupDocument, Record};
use crate::registry::SchemaRegistry;

/// A single migration step that moves one collection's records from one
/// version to the next.
///
/// Steps form a linear chain per collection: v1→v2, v2→v3, etc.
/// Each step must be **deterministic and pure**: two devices running the
/// same step on the same record must produce identical results.
pub trait MigrationStep: Send + Sync {
    /// Collection the step applies to.
    fn collection(&self) -> &str;
    /// Source version.
    fn source_version(&self) -> u32;
    /// Target version.
    fn target_version(&self) -> u32;
    /// Transform one record from source to target version.
    fn migrate(&self, record: Record) -> Result<Record, MigrationError>;
}

/// Error during migration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigrationError {
    /// No migration path exists between the source and target versions.
    #[error("no migration path from v{from} to v{to}")]
    NoPath { from: u32, to: u32 },
    /// The document version is newer than the current version.
    #[error("document version v{found} is newer than current v{current}")]
    FutureVersion { found: u32, current: u32 },
    /// A collection's chain has no step leaving `missing`.
    #[error("collection `{collection}` has no migration step from v{missing}")]
    GapInChain { collection: String, missing: u32 },
    /// The document carries a collection the registry does not know.
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
    /// A step rejected a record.
    #[error("migration of `{collection}` v{from}→v{to} failed for record {record}: {reason}")]
    StepFailed {
        collection: String,
        from: u32,
        to: u32,
        record: String,
        reason: String,
    },
}

type CustomTransform = dyn Fn(Record) -> Result<Record, String> + Send + Sync;

/// One field-level operation of a [`RecordStep`].
#[derive(Clone)]
pub enum FieldOp {
    /// Insert `value` under `field` when the field is absent.
    AddDefault { field: String, value: Value },
    /// Move the value of `from` to `to` when `to` is absent.
    Rename { from: String, to: String },
    /// Arbitrary pure transform.
    Custom(Arc<CustomTransform>),
}

impl fmt::Debug for FieldOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddDefault { field, value } => f
                .debug_struct("AddDefault")
                .field("field", field)
                .field("value", value)
                .finish(),
            Self::Rename { from, to } => f
                .debug_struct("Rename")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FieldOp {
    fn apply(&self, mut record: Record) -> Result<Record, String> {
        match self {
            Self::AddDefault { field, value } => {
                if !record.contains_key(field) {
                    record.insert(field.clone(), value.clone());
                }
                Ok(record)
            }
            Self::Rename { from, to } => {
                if !record.contains_key(to) {
                    if let Some(value) = record.remove(from) {
                        record.insert(to.clone(), value);
                    }
                }
                Ok(record)
            }
            Self::Custom(transform) => transform(record),
        }
    }
}

/// The standard [`MigrationStep`]: an ordered list of [`FieldOp`]s.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trackline_migrate::{MigrationStep, Record, RecordStep};
///
/// let step = RecordStep::new("milestones", 2, 3)
///     .rename("parentGoalId", "goalId")
///     .add_default("order", 0);
///
/// let mut v2 = Record::new();
/// v2.insert("id".into(), json!("m1"));
/// v2.insert("parentGoalId".into(), json!("g1"));
///
/// let v3 = step.migrate(v2).unwrap();
/// assert_eq!(v3["goalId"], "g1");
/// assert_eq!(v3["order"], 0);
/// assert!(!v3.contains_key("parentGoalId"));
/// ```
#[derive(Debug, Clone)]
pub struct RecordStep {
    collection: String,
    from: u32,
    to: u32,
    ops: Vec<FieldOp>,
}

impl RecordStep {
    /// A step with no operations yet.
    pub fn new(collection: impl Into<String>, from: u32, to: u32) -> Self {
        Self {
            collection: collection.into(),
            from,
            to,
            ops: Vec::new(),
        }
    }

    /// A step for a collection whose shape did not change between versions.
    pub fn passthrough(collection: impl Into<String>, from: u32, to: u32) -> Self {
        Self::new(collection, from, to)
    }

    /// Supply `value` for a field introduced by this version.
    pub fn add_default(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(FieldOp::AddDefault {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Rename a field, moving its value verbatim.
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(FieldOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Append an arbitrary pure transform.
    pub fn custom<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> Result<Record, String> + Send + Sync + 'static,
    {
        self.ops.push(FieldOp::Custom(Arc::new(transform)));
        self
    }
}

impl MigrationStep for RecordStep {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn source_version(&self) -> u32 {
        self.from
    }

    fn target_version(&self) -> u32 {
        self.to
    }

    fn migrate(&self, record: Record) -> Result<Record, MigrationError> {
        let id = record_id(&record).unwrap_or("<no id>").to_string();
        self.ops
            .iter()
            .try_fold(record, |rec, op| op.apply(rec))
            .map_err(|reason| MigrationError::StepFailed {
                collection: self.collection.clone(),
                from: self.from,
                to: self.to,
                record: id,
                reason,
            })
    }
}

/// Runs a registry's migration chains over backup documents.
///
/// When a document at version N needs to reach the current version M
/// (N < M), every collection in it runs its steps N→…→M in sequence.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trackline_migrate::{
///     BackupDocument, CollectionSchema, FieldKind, FieldSpec, MigrationEngine, Record,
///     RecordShape, RecordStep, SchemaRegistry,
/// };
///
/// let registry = SchemaRegistry::builder(2)
///     .collection(
///         CollectionSchema::new("habits")
///             .shape(1, RecordShape::new(vec![FieldSpec::required("name", FieldKind::String)]))
///             .shape(2, RecordShape::new(vec![
///                 FieldSpec::required("name", FieldKind::String),
///                 FieldSpec::required("isActive", FieldKind::Boolean),
///             ]))
///             .step(RecordStep::new("habits", 1, 2).add_default("isActive", true)),
///     )
///     .build()
///     .unwrap();
///
/// let mut habit = Record::new();
/// habit.insert("id".into(), json!("h1"));
/// habit.insert("name".into(), json!("Read"));
/// let v1 = BackupDocument::new(1).with_collection("habits", vec![habit]);
///
/// let v2 = MigrationEngine::new(&registry).migrate(v1).unwrap();
/// assert_eq!(v2.schema_version, 2);
/// assert_eq!(v2.collections["habits"][0]["isActive"], true);
/// ```
pub struct MigrationEngine<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> MigrationEngine<'a> {
    /// Create an engine over `registry`.
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// The current (target) schema version.
    pub fn current_version(&self) -> u32 {
        self.registry.current_version()
    }

    /// Check if a document at `version` needs migration.
    pub fn needs_migration(&self, version: u32) -> bool {
        version != self.registry.current_version()
    }

    /// Check that `version` can be migrated to current.
    pub fn check_version(&self, version: u32) -> Result<(), MigrationError> {
        let current = self.registry.current_version();
        if version > current {
            return Err(MigrationError::FutureVersion {
                found: version,
                current,
            });
        }
        if version < self.registry.min_supported_version() {
            return Err(MigrationError::NoPath {
                from: version,
                to: current,
            });
        }
        Ok(())
    }

    /// Migrate a whole document to the current version.
    ///
    /// A document already at the current version is returned unchanged.
    pub fn migrate(&self, document: BackupDocument) -> Result<BackupDocument, MigrationError> {
        let from = document.schema_version;
        self.check_version(from)?;
        if !self.needs_migration(from) {
            return Ok(document);
        }

        let BackupDocument {
            exported_at,
            collections,
            ..
        } = document;

        let collections: BTreeMap<String, Vec<Record>> = collections
            .into_iter()
            .map(|(name, records)| {
                let records = self.migrate_records(&name, records, from)?;
                Ok((name, records))
            })
            .collect::<Result<_, MigrationError>>()?;

        Ok(BackupDocument {
            schema_version: self.registry.current_version(),
            exported_at,
            collections,
        })
    }

    /// Migrate one collection's records from `from_version` to current.
    pub fn migrate_records(
        &self,
        collection: &str,
        records: Vec<Record>,
        from_version: u32,
    ) -> Result<Vec<Record>, MigrationError> {
        let schema = self
            .registry
            .get(collection)
            .ok_or_else(|| MigrationError::UnknownCollection(collection.to_string()))?;
        let current = self.registry.current_version();

        // A collection introduced after the document's version starts at its
        // introduction version.
        let mut version = from_version.max(schema.introduced_version());
        let mut records = records;

        while version < current {
            let step = schema
                .step_from(version)
                .ok_or_else(|| MigrationError::GapInChain {
                    collection: collection.to_string(),
                    missing: version,
                })?;

            records = records
                .into_iter()
                .map(|record| step.migrate(record))
                .collect::<Result<_, _>>()?;

            debug!(
                collection,
                from = version,
                to = step.target_version(),
                records = records.len(),
                "applied migration step"
            );
            version = step.target_version();
        }

        Ok(records)
    }

    /// Migrate a single record from `from_version` to current.
    pub fn migrate_record(
        &self,
        collection: &str,
        record: Record,
        from_version: u32,
    ) -> Result<Record, MigrationError> {
        let mut migrated = self.migrate_records(collection, vec![record], from_version)?;
        migrated.pop().ok_or(MigrationError::NoPath {
            from: from_version,
            to: self.registry.current_version(),
        })
    }

    /// Validate that `collection` has a complete chain to current.
    pub fn validate_chain(&self, collection: &str) -> Result<(), MigrationError> {
        let schema = self
            .registry
            .get(collection)
            .ok_or_else(|| MigrationError::UnknownCollection(collection.to_string()))?;
        let mut version = schema.introduced_version();
        while version < self.registry.current_version() {
            let step = schema
                .step_from(version)
                .ok_or_else(|| MigrationError::GapInChain {
                    collection: collection.to_string(),
                    missing: version,
                })?;
            version = step.target_version();
        }
        Ok(())
    }

    /// List a collection's registered steps as (from, to) pairs.
    pub fn registered_steps(&self, collection: &str) -> Vec<(u32, u32)> {
        self.registry
            .get(collection)
            .map(|schema| {
                schema
                    .steps()
                    .iter()
                    .map(|s| (s.source_version(), s.target_version()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
