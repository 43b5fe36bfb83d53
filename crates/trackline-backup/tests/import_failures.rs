//! Partial writes, cancellation and concurrent imports.

mod common;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use common::{raw, Fixture};
use serde_json::{json, Value};
use trackline_backup::{
    catalog, BackupConfig, BackupError, CancelToken, ImportMode, ImportPhase, Importer,
    ProviderSet, Record,
};
use trackline_store::{CollectionProvider, MemoryCollection, ProviderError, WriteSummary};

fn document() -> Value {
    json!({
        "schemaVersion": 3,
        "exportedAt": "2024-04-01T10:00:00Z",
        "collections": {
            "goals": [{"id": "g1", "title": "t", "createdAt": "2024-01-01", "order": 0, "isActive": true}],
            "milestones": [{"id": "m1", "title": "t", "goalId": "g1", "order": 0}],
            "habits": [
                {"id": "h1", "name": "n", "createdAt": "2024-01-01", "order": 0, "isActive": true},
                {"id": "h2", "name": "n", "createdAt": "2024-01-01", "order": 1, "isActive": true}
            ],
            "habitCompletions": [{"id": "hc1", "habitId": "h1", "completedAt": "2024-01-02"}]
        }
    })
}

/// Delegates reads and writes to an inner collection but can be told to
/// fail, block, or trip a cancel token on write.
struct Scripted {
    inner: MemoryCollection,
    on_write: Behavior,
}

enum Behavior {
    Fail,
    Cancel(CancelToken),
    Block {
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
    },
}

impl Scripted {
    fn before_write(&self) -> Result<(), ProviderError> {
        match &self.on_write {
            Behavior::Fail => Err(ProviderError::Rejected("database is locked".into())),
            Behavior::Cancel(token) => {
                token.cancel();
                Ok(())
            }
            Behavior::Block { entered, release } => {
                entered.lock().unwrap().send(()).unwrap();
                release.lock().unwrap().recv().unwrap();
                Ok(())
            }
        }
    }
}

impl CollectionProvider for Scripted {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load_all(&self) -> Result<Vec<Record>, ProviderError> {
        self.inner.load_all()
    }

    fn replace_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        self.before_write()?;
        self.inner.replace_all(records)
    }

    fn merge_all(&self, records: Vec<Record>) -> Result<WriteSummary, ProviderError> {
        self.before_write()?;
        self.inner.merge_all(records)
    }
}

fn importer_with(fixture: &Fixture, scripted: Scripted) -> Importer {
    let providers: ProviderSet = fixture.providers().with(Arc::new(scripted));
    Importer::new(Arc::clone(&fixture.registry), providers, BackupConfig::default()).unwrap()
}

#[test]
fn failed_collection_does_not_roll_back_earlier_ones() {
    let fixture = Fixture::empty();
    let importer = importer_with(
        &fixture,
        Scripted {
            inner: MemoryCollection::new(catalog::HABITS),
            on_write: Behavior::Fail,
        },
    );

    let report = importer
        .import_document(&raw(&document()), ImportMode::Replace)
        .unwrap();

    let habits = report.outcome(catalog::HABITS).unwrap();
    assert_eq!(habits.write_error.as_deref(), Some("database is locked"));
    assert_eq!(habits.records_applied, 0);
    assert_eq!(habits.errors.len(), 2);
    assert_eq!(habits.records_attempted, 2);

    // Written before the failure, and after it.
    assert_eq!(fixture.records(catalog::GOALS).len(), 1);
    assert_eq!(fixture.records(catalog::MILESTONES).len(), 1);
    assert_eq!(fixture.records(catalog::HABIT_COMPLETIONS).len(), 1);
    assert!(!report.is_clean());
    assert_eq!(importer.phase(), ImportPhase::Completed);
}

#[test]
fn cancellation_truncates_remaining_collections() {
    let fixture = Fixture::empty();
    let token = CancelToken::new();
    let importer = importer_with(
        &fixture,
        Scripted {
            inner: MemoryCollection::new(catalog::MILESTONES),
            on_write: Behavior::Cancel(token.clone()),
        },
    );

    let report = importer
        .import_with_cancel(&raw(&document()), ImportMode::Replace, &token)
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.outcome(catalog::GOALS).unwrap().records_applied, 1);
    // The collection being written when the token tripped still finishes.
    assert_eq!(report.outcome(catalog::MILESTONES).unwrap().records_applied, 1);

    for name in [catalog::HABITS, catalog::HABIT_COMPLETIONS] {
        let outcome = report.outcome(name).unwrap();
        assert_eq!(outcome.records_applied, 0);
        assert_eq!(outcome.errors.len(), outcome.records_attempted);
        assert!(outcome.errors.iter().all(|e| e.reason == "import cancelled"));
    }
    assert!(fixture.records(catalog::GOALS).len() == 1);
    assert!(fixture.records(catalog::HABITS).is_empty());
}

#[test]
fn concurrent_import_fails_fast() {
    let fixture = Fixture::empty();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let importer = Arc::new(importer_with(
        &fixture,
        Scripted {
            inner: MemoryCollection::new(catalog::GOALS),
            on_write: Behavior::Block {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            },
        },
    ));

    let bytes = raw(&document());
    let first = {
        let importer = Arc::clone(&importer);
        let bytes = bytes.clone();
        thread::spawn(move || importer.import_document(&bytes, ImportMode::Replace))
    };

    entered_rx.recv().unwrap();
    assert!(importer.is_importing());
    assert_eq!(importer.phase(), ImportPhase::Applying(catalog::GOALS.to_string()));

    let second = importer.import_document(&bytes, ImportMode::Merge);
    assert!(matches!(second, Err(BackupError::ImportAlreadyInProgress)));
    let preview = importer.preview(&bytes).unwrap();
    assert_eq!(preview.collections[catalog::HABITS], 2);

    release_tx.send(()).unwrap();
    let report = first.join().unwrap().unwrap();
    assert!(report.is_clean());
    assert!(!importer.is_importing());

    // The flag is released; a later import may run.
    release_tx.send(()).unwrap();
    importer
        .import_document(&bytes, ImportMode::Merge)
        .unwrap();
}

#[test]
fn rejected_import_releases_the_flag() {
    let fixture = Fixture::empty();
    let importer = fixture.importer();
    assert!(importer
        .import_document(b"nope", ImportMode::Replace)
        .is_err());
    assert!(!importer.is_importing());
    importer
        .import_document(&raw(&document()), ImportMode::Replace)
        .unwrap();
}
