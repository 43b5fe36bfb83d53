//! # trackline-backup
//!
//! Export and import of all trackline data as one portable, versioned JSON
//! document.
//!
//! ```text
//! export:  providers ──► Exporter ──► Redactor ──► BackupDocument ──► bytes
//! import:  bytes ──► Validator ──► MigrationEngine ──► Importer ──► providers
//!                                                            │
//!                                                            └──► ImportReport
//! ```
//!
//! - The [`catalog`] declares every collection's record shapes and migration
//!   steps, versions 1 through [`catalog::CURRENT_VERSION`].
//! - [`Validator`] checks a raw document before anything is touched.
//! - [`redact`] masks secrets on export and keeps local secrets on import.
//! - [`Importer`] applies collections parents-first, one provider call per
//!   collection, and reports what was applied and what was not.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use trackline_backup::{catalog, BackupConfig, Exporter, ImportMode, Importer, ProviderSet};
//! use trackline_store::MemoryCollection;
//!
//! let registry = Arc::new(catalog::builtin_registry().unwrap());
//! let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name));
//!
//! let exporter = Exporter::new(Arc::clone(&registry), providers.clone(), BackupConfig::default()).unwrap();
//! let bytes = exporter.export_bytes().unwrap();
//!
//! let importer = Importer::new(registry, providers, BackupConfig::default()).unwrap();
//! let report = importer.import_document(&bytes, ImportMode::Replace).unwrap();
//! assert!(report.is_clean());
//! ```

pub mod catalog;
mod config;
mod error;
mod export;
mod import;
mod providers;
pub mod redact;
mod validate;

pub use config::BackupConfig;
pub use error::BackupError;
pub use export::{ExportSummary, Exporter};
pub use import::{
    CancelToken, ImportMode, ImportOutcome, ImportPhase, ImportPreview, ImportReport, Importer,
};
pub use providers::ProviderSet;
pub use redact::REDACTED_SENTINEL;
pub use validate::{Severity, ValidationIssue, ValidationReport, Validator};

pub use trackline_migrate::{BackupDocument, Record, SchemaRegistry};
pub use trackline_store::{CollectionProvider, RecordError};
