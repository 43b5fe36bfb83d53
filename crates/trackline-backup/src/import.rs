//! Import orchestration.
//!
//! An import moves through
//! `Received → Parsed → Validated → Migrated → Applying → Completed`.
//! Any failure before `Applying` ends in `Rejected` with nothing written.
//! Once the first collection write starts the import always completes: a
//! collection the provider rejects, or a cancellation, is reported in the
//! [`ImportReport`] and earlier collections stay written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use trackline_migrate::{record_id, BackupDocument, MigrationEngine, Record, SchemaRegistry};
use trackline_store::{CollectionProvider, RecordError, WriteSummary};

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::providers::ProviderSet;
use crate::redact::{reconcile_for_import, LocalSecrets};
use crate::validate::{Validator, COLLECTIONS_KEY, EXPORTED_AT_KEY};

/// How imported records combine with existing data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Discard each imported collection's contents first (fresh restore).
    #[default]
    Replace,
    /// Upsert by id next to existing data.
    Merge,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
        })
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown import mode `{other}` (expected replace or merge)")),
        }
    }
}

/// Where the current (or last) import call is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImportPhase {
    /// No import has run yet.
    #[default]
    Idle,
    Received,
    Parsed,
    Validated,
    Migrated,
    /// Writing the named collection.
    Applying(String),
    Completed,
    Rejected,
}

/// Shared flag a caller trips to stop an import between collections.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of importing one collection.
///
/// `records_applied + errors.len() == records_attempted` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub collection: String,
    pub records_attempted: usize,
    pub records_applied: usize,
    /// One entry per record that was not applied.
    pub errors: Vec<RecordError>,
    /// Set when the provider rejected the whole collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
}

impl ImportOutcome {
    /// True if every attempted record was applied.
    pub fn is_complete(&self) -> bool {
        self.write_error.is_none() && self.errors.is_empty()
    }
}

/// Everything one import call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Version the document declared before migration.
    pub source_version: u32,
    /// One outcome per imported collection, in apply order.
    pub outcomes: Vec<ImportOutcome>,
    /// Non-fatal validation findings, such as unrecognized collections.
    pub warnings: Vec<String>,
    /// True if the import was cancelled after writing began.
    pub cancelled: bool,
}

impl ImportReport {
    /// True if every collection applied every record and nothing was cancelled.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(ImportOutcome::is_complete)
    }

    pub fn outcome(&self, collection: &str) -> Option<&ImportOutcome> {
        self.outcomes.iter().find(|o| o.collection == collection)
    }

    pub fn records_applied(&self) -> usize {
        self.outcomes.iter().map(|o| o.records_applied).sum()
    }

    pub fn records_failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.errors.len()).sum()
    }

    /// Collections whose every record was applied.
    pub fn collections_restored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_complete()).count()
    }
}

/// What an import would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub source_version: u32,
    pub target_version: u32,
    pub exported_at: DateTime<Utc>,
    /// Records that would be written, per collection.
    pub collections: BTreeMap<String, usize>,
    /// Records that would be skipped, per collection.
    pub skipped: BTreeMap<String, Vec<RecordError>>,
    pub warnings: Vec<String>,
}

/// A document that passed validation and migration.
struct Prepared {
    source_version: u32,
    document: BackupDocument,
    skipped: BTreeMap<String, Vec<RecordError>>,
    warnings: Vec<String>,
}

/// Holds the importer's in-progress flag for the duration of one call.
struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, BackupError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| BackupError::ImportAlreadyInProgress)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Applies backup documents to a [`ProviderSet`].
///
/// One importer serializes its imports: a call made while another is running
/// fails with [`BackupError::ImportAlreadyInProgress`].
pub struct Importer {
    registry: Arc<SchemaRegistry>,
    providers: ProviderSet,
    config: BackupConfig,
    in_progress: AtomicBool,
    phase: Mutex<ImportPhase>,
}

impl Importer {
    /// Create an importer. Fails if a registry collection has no provider.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        providers: ProviderSet,
        config: BackupConfig,
    ) -> Result<Self, BackupError> {
        providers.ensure_covers(&registry)?;
        Ok(Self {
            registry,
            providers,
            config,
            in_progress: AtomicBool::new(false),
            phase: Mutex::new(ImportPhase::Idle),
        })
    }

    /// Phase of the running import, or the final phase of the last one.
    pub fn phase(&self) -> ImportPhase {
        self.phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True while an import call is running.
    pub fn is_importing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Import using the configured default mode.
    pub fn import(&self, raw: &[u8]) -> Result<ImportReport, BackupError> {
        self.import_document(raw, self.config.default_mode)
    }

    /// Validate, migrate and apply a raw document.
    pub fn import_document(&self, raw: &[u8], mode: ImportMode) -> Result<ImportReport, BackupError> {
        self.run(raw, mode, None)
    }

    /// Like [`import_document`](Self::import_document), checking `cancel`
    /// before each collection write.
    pub fn import_with_cancel(
        &self,
        raw: &[u8],
        mode: ImportMode,
        cancel: &CancelToken,
    ) -> Result<ImportReport, BackupError> {
        self.run(raw, mode, Some(cancel))
    }

    /// Parse, validate and migrate `raw` without writing anything.
    pub fn preview(&self, raw: &[u8]) -> Result<ImportPreview, BackupError> {
        let prepared = self.prepare(raw, |_| {})?;
        Ok(ImportPreview {
            source_version: prepared.source_version,
            target_version: prepared.document.schema_version,
            exported_at: prepared.document.exported_at,
            collections: prepared
                .document
                .collections
                .iter()
                .map(|(name, records)| (name.clone(), records.len()))
                .collect(),
            skipped: prepared.skipped,
            warnings: prepared.warnings,
        })
    }

    fn run(
        &self,
        raw: &[u8],
        mode: ImportMode,
        cancel: Option<&CancelToken>,
    ) -> Result<ImportReport, BackupError> {
        let _guard = InProgress::acquire(&self.in_progress)?;
        self.set_phase(ImportPhase::Received);

        let prepared = match self.prepare(raw, |phase| self.set_phase(phase)) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "import rejected");
                self.set_phase(ImportPhase::Rejected);
                return Err(e);
            }
        };
        if cancel.is_some_and(CancelToken::is_cancelled) {
            self.set_phase(ImportPhase::Rejected);
            return Err(BackupError::ImportCancelled);
        }

        let report = self.apply(prepared, mode, cancel);
        self.set_phase(ImportPhase::Completed);
        info!(
            %mode,
            applied = report.records_applied(),
            failed = report.records_failed(),
            cancelled = report.cancelled,
            "import completed"
        );
        Ok(report)
    }

    fn set_phase(&self, phase: ImportPhase) {
        debug!(?phase, "import phase");
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Parse, validate and migrate. Reports phase transitions to `on_phase`.
    fn prepare(
        &self,
        raw: &[u8],
        on_phase: impl Fn(ImportPhase),
    ) -> Result<Prepared, BackupError> {
        if let Some(found) = BackupDocument::peek_version(raw) {
            if !self.registry.is_supported(found) {
                return Err(self.unsupported(found));
            }
        }
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| BackupError::MalformedDocument(e.to_string()))?;
        if !value.is_object() {
            return Err(BackupError::MalformedDocument(
                "top level must be a JSON object".to_string(),
            ));
        }
        on_phase(ImportPhase::Parsed);

        let report = Validator::new(&self.registry).validate(&value);
        if let Some(found) = report.declared_version {
            if !self.registry.is_supported(found) {
                return Err(self.unsupported(found));
            }
        }
        if report.has_fatal() {
            return Err(BackupError::InvalidDocument(
                report.fatal().cloned().collect(),
            ));
        }
        let source_version = report.declared_version.ok_or_else(|| {
            BackupError::MalformedDocument("missing `schemaVersion`".to_string())
        })?;
        for warning in report.warnings() {
            warn!(%warning, "ignoring part of backup document");
        }
        on_phase(ImportPhase::Validated);

        let Value::Object(mut top) = value else {
            return Err(BackupError::MalformedDocument(
                "top level must be a JSON object".to_string(),
            ));
        };
        let exported_at = top
            .get(EXPORTED_AT_KEY)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| BackupError::MalformedDocument("unreadable `exportedAt`".to_string()))?;

        let mut document = BackupDocument {
            schema_version: source_version,
            exported_at,
            collections: BTreeMap::new(),
        };
        let mut skipped: BTreeMap<String, Vec<RecordError>> = BTreeMap::new();

        let collections = match top.remove(COLLECTIONS_KEY) {
            Some(Value::Object(collections)) => collections,
            _ => serde_json::Map::new(),
        };
        for (name, records) in collections {
            if !self.registry.is_known_at(&name, source_version) {
                continue;
            }
            let Value::Array(records) = records else {
                continue;
            };

            let rejected: BTreeMap<usize, RecordError> = report
                .rejected_in(&name)
                .filter_map(|issue| {
                    let index = issue.record_index?;
                    let id = issue.record_id.clone().unwrap_or_else(|| format!("#{index}"));
                    Some((index, RecordError::new(id, issue.message.clone())))
                })
                .collect();

            let mut kept = Vec::with_capacity(records.len());
            for (index, record) in records.into_iter().enumerate() {
                if let (false, Value::Object(record)) = (rejected.contains_key(&index), record) {
                    kept.push(record);
                }
            }
            if !rejected.is_empty() {
                warn!(collection = %name, rejected = rejected.len(), "skipping invalid records");
                skipped.insert(name.clone(), rejected.into_values().collect());
            }
            document.collections.insert(name, kept);
        }

        // A document that cannot be brought to the current version is
        // unsupported, whatever the step reported.
        let document = MigrationEngine::new(&self.registry)
            .migrate(document)
            .map_err(|e| {
                warn!(error = %e, from = source_version, "migration failed");
                self.unsupported(source_version)
            })?;
        on_phase(ImportPhase::Migrated);

        Ok(Prepared {
            source_version,
            document,
            skipped,
            warnings: report.warnings().map(ToString::to_string).collect(),
        })
    }

    fn unsupported(&self, found: u32) -> BackupError {
        BackupError::UnsupportedSchemaVersion {
            found,
            current: self.registry.current_version(),
        }
    }

    fn apply(
        &self,
        prepared: Prepared,
        mode: ImportMode,
        cancel: Option<&CancelToken>,
    ) -> ImportReport {
        let Prepared {
            source_version,
            mut document,
            mut skipped,
            warnings,
        } = prepared;
        let mut report = ImportReport {
            source_version,
            outcomes: Vec::new(),
            warnings,
            cancelled: false,
        };

        for schema in self.registry.apply_order() {
            let name = schema.name();
            // Collections the document does not carry are left untouched.
            let Some(records) = document.collections.remove(name) else {
                continue;
            };
            let rejected = skipped.remove(name).unwrap_or_default();

            if cancel.is_some_and(CancelToken::is_cancelled) {
                report.cancelled = true;
                report
                    .outcomes
                    .push(unapplied(name, records, rejected, "import cancelled", None));
                continue;
            }

            self.set_phase(ImportPhase::Applying(name.to_string()));
            let outcome = match self.providers.get(name) {
                Some(provider) => {
                    self.apply_collection(provider, records, rejected, mode, &mut report.warnings)
                }
                None => unapplied(
                    name,
                    records,
                    rejected,
                    "no provider registered",
                    Some("no provider registered".to_string()),
                ),
            };
            if outcome.is_complete() {
                info!(collection = name, applied = outcome.records_applied, "imported collection");
            } else {
                warn!(
                    collection = name,
                    applied = outcome.records_applied,
                    failed = outcome.errors.len(),
                    write_error = outcome.write_error.as_deref(),
                    "imported collection with errors"
                );
            }
            report.outcomes.push(outcome);
        }

        report
    }

    fn apply_collection(
        &self,
        provider: &dyn CollectionProvider,
        records: Vec<Record>,
        rejected: Vec<RecordError>,
        mode: ImportMode,
        warnings: &mut Vec<String>,
    ) -> ImportOutcome {
        let name = provider.name();
        let sensitive = self.registry.sensitive_fields(name);

        let records = if sensitive.is_empty() {
            records
        } else {
            let local = match LocalSecrets::load(provider, &sensitive) {
                Ok(local) => local,
                Err(e) => {
                    let reason = format!("could not read local sensitive values: {e}");
                    return unapplied(name, records, rejected, &reason, Some(reason.clone()));
                }
            };
            // Local sensitive values outlive a replace. With no imported
            // record left to carry them the local collection stays as is.
            if mode == ImportMode::Replace && records.is_empty() && !local.is_empty() {
                warn!(
                    collection = name,
                    "no imported record carries local sensitive values; keeping local records"
                );
                warnings.push(format!(
                    "kept local `{name}`: no imported record carries its sensitive values"
                ));
                return ImportOutcome {
                    collection: name.to_string(),
                    records_attempted: rejected.len(),
                    records_applied: 0,
                    errors: rejected,
                    write_error: None,
                };
            }
            records
                .into_iter()
                .map(|record| reconcile_for_import(record, &sensitive, &local))
                .collect()
        };

        let attempted = rejected.len() + records.len();
        // Ids are captured up front; a failed batch reports every record.
        let ids: Vec<String> = records
            .iter()
            .enumerate()
            .map(|(i, r)| display_id(r, i))
            .collect();

        let result = match mode {
            ImportMode::Replace => provider.replace_all(records),
            ImportMode::Merge => provider.merge_all(records),
        };

        let mut errors = rejected;
        match result {
            Ok(WriteSummary {
                applied,
                errors: refused,
            }) => {
                errors.extend(refused);
                ImportOutcome {
                    collection: name.to_string(),
                    records_attempted: attempted,
                    records_applied: applied,
                    errors,
                    write_error: None,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                errors.extend(
                    ids.into_iter()
                        .map(|id| RecordError::new(id, format!("collection write failed: {reason}"))),
                );
                ImportOutcome {
                    collection: name.to_string(),
                    records_attempted: attempted,
                    records_applied: 0,
                    errors,
                    write_error: Some(reason),
                }
            }
        }
    }
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish()
    }
}

fn display_id(record: &Record, index: usize) -> String {
    record_id(record).map_or_else(|| format!("#{index}"), str::to_owned)
}

/// An outcome in which none of `records` was applied.
fn unapplied(
    collection: &str,
    records: Vec<Record>,
    rejected: Vec<RecordError>,
    reason: &str,
    write_error: Option<String>,
) -> ImportOutcome {
    let attempted = rejected.len() + records.len();
    let mut errors = rejected;
    errors.extend(
        records
            .iter()
            .enumerate()
            .map(|(i, r)| RecordError::new(display_id(r, i), reason)),
    );
    ImportOutcome {
        collection: collection.to_string(),
        records_attempted: attempted,
        records_applied: 0,
        errors,
        write_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use serde_json::json;
    use trackline_migrate::{CollectionSchema, RecordShape, RecordStep};
    use trackline_store::MemoryCollection;

    fn importer() -> Importer {
        let registry = Arc::new(catalog::builtin_registry().unwrap());
        let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name));
        Importer::new(registry, providers, BackupConfig::default()).unwrap()
    }

    fn raw(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn mode_parses_and_displays() {
        assert_eq!("merge".parse::<ImportMode>().unwrap(), ImportMode::Merge);
        assert_eq!("Replace".parse::<ImportMode>().unwrap(), ImportMode::Replace);
        assert!("append".parse::<ImportMode>().is_err());
        assert_eq!(ImportMode::Merge.to_string(), "merge");
    }

    #[test]
    fn garbage_is_malformed() {
        let importer = importer();
        let err = importer
            .import_document(b"{ not json", ImportMode::Replace)
            .unwrap_err();
        assert!(matches!(err, BackupError::MalformedDocument(_)));
        assert_eq!(importer.phase(), ImportPhase::Rejected);

        let err = importer.import_document(b"[]", ImportMode::Replace).unwrap_err();
        assert!(matches!(err, BackupError::MalformedDocument(_)));
    }

    #[test]
    fn missing_exported_at_is_invalid() {
        let err = importer()
            .import_document(&raw(json!({"schemaVersion": 3, "collections": {}})), ImportMode::Merge)
            .unwrap_err();
        assert!(matches!(err, BackupError::InvalidDocument(ref issues) if issues.len() == 1));
    }

    #[test]
    fn future_version_is_unsupported_before_parsing_records() {
        let err = importer()
            .import_document(
                br#"{"schemaVersion": 9, "collections": {"goals": "not a list"}}"#,
                ImportMode::Replace,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::UnsupportedSchemaVersion { found: 9, current: 3 }
        ));
    }

    #[test]
    fn failing_step_is_unsupported_and_writes_nothing() {
        let registry = Arc::new(
            SchemaRegistry::builder(2)
                .collection(
                    CollectionSchema::new("notes")
                        .shape(1, RecordShape::new(vec![]))
                        .step(
                            RecordStep::new("notes", 1, 2)
                                .custom(|_| Err("unreadable body".to_string())),
                        ),
                )
                .build()
                .unwrap(),
        );
        let notes = Arc::new(MemoryCollection::new("notes"));
        let providers = ProviderSet::new().with(notes.clone());
        let importer = Importer::new(registry, providers, BackupConfig::default()).unwrap();

        let err = importer
            .import_document(
                &raw(json!({
                    "schemaVersion": 1,
                    "exportedAt": "2024-01-01T00:00:00Z",
                    "collections": {"notes": [{"id": "n1"}]}
                })),
                ImportMode::Replace,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::UnsupportedSchemaVersion { found: 1, current: 2 }
        ));
        assert!(notes.is_empty());
        assert_eq!(importer.phase(), ImportPhase::Rejected);
    }

    #[test]
    fn phase_ends_completed() {
        let importer = importer();
        assert_eq!(importer.phase(), ImportPhase::Idle);
        importer
            .import_document(
                &raw(json!({"schemaVersion": 3, "exportedAt": "2024-01-01T00:00:00Z", "collections": {}})),
                ImportMode::Replace,
            )
            .unwrap();
        assert_eq!(importer.phase(), ImportPhase::Completed);
        assert!(!importer.is_importing());
    }

    #[test]
    fn cancel_before_writing_rejects() {
        let importer = importer();
        let token = CancelToken::new();
        token.cancel();
        let err = importer
            .import_with_cancel(
                &raw(json!({"schemaVersion": 3, "exportedAt": "2024-01-01T00:00:00Z", "collections": {"goals": []}})),
                ImportMode::Replace,
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, BackupError::ImportCancelled));
        assert_eq!(importer.phase(), ImportPhase::Rejected);
    }

    #[test]
    fn preview_counts_without_writing() {
        let registry = Arc::new(catalog::builtin_registry().unwrap());
        let goals = Arc::new(MemoryCollection::new(catalog::GOALS));
        let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name))
            .with(goals.clone());
        let importer = Importer::new(registry, providers, BackupConfig::default()).unwrap();

        let preview = importer
            .preview(&raw(json!({
                "schemaVersion": 1,
                "exportedAt": "2023-06-01T00:00:00Z",
                "collections": {
                    "goals": [
                        {"id": "g1", "title": "t", "createdAt": "2023-01-01"},
                        {"id": "g2"}
                    ],
                    "recipes": []
                }
            })))
            .unwrap();

        assert_eq!(preview.source_version, 1);
        assert_eq!(preview.target_version, catalog::CURRENT_VERSION);
        assert_eq!(preview.collections["goals"], 1);
        assert_eq!(preview.skipped["goals"][0].record_id, "g2");
        assert_eq!(preview.warnings.len(), 1);
        assert!(goals.is_empty());
        assert_eq!(importer.phase(), ImportPhase::Idle);
    }

    #[test]
    fn report_helpers_summarize() {
        let report = ImportReport {
            source_version: 3,
            outcomes: vec![
                ImportOutcome {
                    collection: "goals".into(),
                    records_attempted: 2,
                    records_applied: 2,
                    errors: vec![],
                    write_error: None,
                },
                ImportOutcome {
                    collection: "habits".into(),
                    records_attempted: 3,
                    records_applied: 2,
                    errors: vec![RecordError::new("h3", "bad")],
                    write_error: None,
                },
            ],
            warnings: vec![],
            cancelled: false,
        };
        assert!(!report.is_clean());
        assert_eq!(report.records_applied(), 4);
        assert_eq!(report.records_failed(), 1);
        assert_eq!(report.collections_restored(), 1);
        assert_eq!(report.outcome("habits").unwrap().errors[0].record_id, "h3");
    }
}
