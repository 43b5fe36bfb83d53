use trackline_migrate::RegistryError;
use trackline_store::ProviderError;

use crate::validate::ValidationIssue;

/// Fatal backup errors.
///
/// Import errors in this enum are raised before any collection is written.
/// Failures after the first write are reported in the
/// [`ImportReport`](crate::ImportReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The input is not JSON, or its top level is not an object.
    #[error("malformed backup document: {0}")]
    MalformedDocument(String),
    /// The document failed structural validation.
    #[error("invalid backup document: {}", summarize(.0))]
    InvalidDocument(Vec<ValidationIssue>),
    /// The document's version is outside the readable range, or migrating
    /// it to current failed.
    #[error("unsupported schema version v{found} (current is v{current})")]
    UnsupportedSchemaVersion { found: u32, current: u32 },
    /// Another import is running on the same importer.
    #[error("an import is already in progress")]
    ImportAlreadyInProgress,
    /// The import was cancelled before any collection was written.
    #[error("import cancelled before any collection was written")]
    ImportCancelled,
    /// Export could not read a collection.
    #[error("failed to read collection `{collection}`: {source}")]
    CollectionRead {
        collection: String,
        source: ProviderError,
    },
    /// A catalog collection has no provider.
    #[error("no provider registered for collection `{0}`")]
    MissingProvider(String),
    /// Encoding the document failed.
    #[error("failed to encode backup document: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The schema registry is inconsistent.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    match issues {
        [] => "no issues recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}
