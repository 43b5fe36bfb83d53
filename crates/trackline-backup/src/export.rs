use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use trackline_migrate::{BackupDocument, Record, SchemaRegistry};

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::providers::ProviderSet;
use crate::redact::{redact_for_export, redactable_count};

/// What an export contained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub schema_version: u32,
    /// Record count per collection.
    pub collections: BTreeMap<String, usize>,
    /// Number of sensitive values replaced with the sentinel.
    pub redacted_fields: usize,
}

impl ExportSummary {
    pub fn total_records(&self) -> usize {
        self.collections.values().sum()
    }
}

/// Builds backup documents from the current contents of every collection.
///
/// Collections are read one after another; the result is not a single
/// atomic snapshot across collections. Export performs no writes, so an
/// abandoned export leaves nothing behind.
pub struct Exporter {
    registry: Arc<SchemaRegistry>,
    providers: ProviderSet,
    config: BackupConfig,
}

impl Exporter {
    /// Create an exporter. Fails if a registry collection has no provider.
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
        })
    }

    /// Read every collection and assemble a redacted document stamped with
    /// the current version. Empty collections are present as empty sequences.
    pub fn build_export(&self) -> Result<BackupDocument, BackupError> {
        self.build_export_with_summary().map(|(document, _)| document)
    }

    /// [`build_export`](Self::build_export) plus a summary for display.
    pub fn build_export_with_summary(
        &self,
    ) -> Result<(BackupDocument, ExportSummary), BackupError> {
        let version = self.registry.current_version();
        let mut document = BackupDocument::new(version);
        let mut summary = ExportSummary {
            schema_version: version,
            ..ExportSummary::default()
        };

        for schema in self.registry.collections() {
            let name = schema.name();
            let provider = self
                .providers
                .get(name)
                .ok_or_else(|| BackupError::MissingProvider(name.to_string()))?;
            let records = provider
                .load_all()
                .map_err(|source| BackupError::CollectionRead {
                    collection: name.to_string(),
                    source,
                })?;

            let sensitive = self.registry.sensitive_fields(name);
            let records: Vec<Record> = if sensitive.is_empty() {
                records
            } else {
                records
                    .into_iter()
                    .map(|record| {
                        summary.redacted_fields += redactable_count(&record, &sensitive);
                        redact_for_export(record, &sensitive)
                    })
                    .collect()
            };

            debug!(collection = name, records = records.len(), "exported collection");
            summary.collections.insert(name.to_string(), records.len());
            document.collections.insert(name.to_string(), records);
        }

        info!(
            version,
            records = summary.total_records(),
            redacted = summary.redacted_fields,
            "built export"
        );
        Ok((document, summary))
    }

    /// Build an export and encode it as JSON.
    pub fn export_bytes(&self) -> Result<Vec<u8>, BackupError> {
        let document = self.build_export()?;
        Ok(document.to_vec(self.config.pretty)?)
    }
}
