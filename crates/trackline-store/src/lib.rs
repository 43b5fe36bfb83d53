//! # trackline-store
//!
//! Collection providers for trackline backups.
//!
//! Every entity subsystem (goals, habits, journal entries, ...) exposes its
//! records through one capability interface, [`CollectionProvider`]. The
//! backup core reads collections through it on export and writes them back
//! through it on import; it never touches storage directly.
//!
//! ## Quick Start
//!
//! ```
//! use serde_json::json;
//! use trackline_store::{CollectionProvider, MemoryCollection};
//!
//! let goals = MemoryCollection::new("goals");
//! let record = json!({ "id": "g1", "title": "Run a 10k" });
//! let summary = goals
//!     .replace_all(vec![record.as_object().unwrap().clone()])
//!     .unwrap();
//!
//! assert_eq!(summary.applied, 1);
//! assert_eq!(goals.load_all().unwrap().len(), 1);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryCollection`] | *(always available)* | Testing, embedding hosts |
//! | `SqliteCollection` | `sqlite` | Desktop and mobile persistence |

mod events;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use events::{ChangeKind, ChangeListener, ChangeNotifier, CollectionChange};
pub use memory::MemoryCollection;
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteCollection, SqliteConfig, SqliteStore};
pub use traits::*;
