//! # trackline-migrate
//!
//! Versioned backup documents and forward-only schema migrations for trackline.
//!
//! A trackline backup is a single JSON document holding every collection
//! (goals, habits, journal entries, ...) as an ordered list of records. The
//! document carries one `schemaVersion`; this crate knows how to move every
//! record of every collection from an older version to the current one.
//!
//! ## How It Works
//!
//! 1. The [`SchemaRegistry`] declares, per collection, the record shape at
//!    each version and the ordered [`MigrationStep`]s between versions.
//! 2. The registry is checked when it is built: no gaps, no two steps leaving
//!    the same version, no references to undeclared collections.
//! 3. The [`MigrationEngine`] walks each collection of a [`BackupDocument`]
//!    from the document's declared version to the registry's current version.
//!
//! ## Key Concepts
//!
//! - **Pure steps**: a step is a function `Record -> Record`. Two devices
//!   migrating the same document produce identical results.
//! - **Linear chain**: v1→v2→v3→...→current, exactly one step per source version.
//! - **No guessing**: documents newer than the current version are rejected.
//! - **Opaque references**: id fields pointing at other collections are moved
//!   verbatim and never resolved.

mod document;
mod engine;
mod registry;
mod schema;

pub use document::{record_id, BackupDocument, Record, ID_FIELD, ORDER_FIELD};
pub use engine::{FieldOp, MigrationEngine, MigrationError, MigrationStep, RecordStep};
pub use registry::{CollectionSchema, RegistryError, SchemaRegistry, SchemaRegistryBuilder};
pub use schema::{describe_value, FieldKind, FieldSpec, RecordShape};
