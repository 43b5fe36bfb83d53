#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use trackline_backup::{catalog, BackupConfig, Exporter, Importer, ProviderSet, Record, SchemaRegistry};
use trackline_store::{ChangeNotifier, CollectionProvider, MemoryCollection};

pub fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn raw(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

/// In-memory collections for the whole catalog plus a write counter.
pub struct Fixture {
    pub registry: Arc<SchemaRegistry>,
    pub collections: BTreeMap<String, Arc<MemoryCollection>>,
    pub writes: Arc<AtomicUsize>,
    pub notifier: Arc<ChangeNotifier>,
}

impl Fixture {
    pub fn empty() -> Self {
        let registry = Arc::new(catalog::builtin_registry().unwrap());
        let notifier = Arc::new(ChangeNotifier::new());
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let collections = catalog::COLLECTIONS
            .iter()
            .map(|name| {
                let collection =
                    MemoryCollection::new(*name).with_notifier(Arc::clone(&notifier));
                (name.to_string(), Arc::new(collection))
            })
            .collect();
        Self {
            registry,
            collections,
            writes,
            notifier,
        }
    }

    /// A user with some data in every collection and no secret configured.
    pub fn populated() -> Self {
        let fixture = Self::empty();
        for (name, records) in sample_dataset() {
            fixture.seed(name, records);
        }
        fixture
    }

    /// Replace a collection handle, e.g. with one carrying constraints.
    pub fn with_collection(mut self, collection: MemoryCollection) -> Self {
        let collection = collection.with_notifier(Arc::clone(&self.notifier));
        self.collections
            .insert(collection.name().to_string(), Arc::new(collection));
        self
    }

    pub fn seed(&self, name: &str, records: Vec<Record>) {
        self.collections[name].replace_all(records).unwrap();
        self.writes.store(0, Ordering::SeqCst);
    }

    pub fn providers(&self) -> ProviderSet {
        let mut set = ProviderSet::new();
        for collection in self.collections.values() {
            set.insert(Arc::clone(collection) as Arc<dyn CollectionProvider>);
        }
        set
    }

    pub fn exporter(&self) -> Exporter {
        Exporter::new(Arc::clone(&self.registry), self.providers(), BackupConfig::default())
            .unwrap()
    }

    pub fn importer(&self) -> Importer {
        Importer::new(Arc::clone(&self.registry), self.providers(), BackupConfig::default())
            .unwrap()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<Record>> {
        self.collections
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect()
    }

    pub fn records(&self, name: &str) -> Vec<Record> {
        self.collections[name].snapshot()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

pub fn sample_dataset() -> Vec<(&'static str, Vec<Record>)> {
    vec![
        (
            catalog::GOALS,
            vec![
                rec(json!({"id": "g1", "title": "Run a marathon", "createdAt": "2024-01-05T09:00:00Z", "order": 0, "isActive": true})),
                rec(json!({"id": "g2", "title": "Learn Rust", "description": "ownership first", "createdAt": "2024-02-01", "order": 4, "isActive": false})),
            ],
        ),
        (
            catalog::MILESTONES,
            vec![
                rec(json!({"id": "m1", "title": "Run 10k", "goalId": "g1", "order": 0, "completed": true})),
                rec(json!({"id": "m2", "title": "Orphan", "goalId": "g-gone", "order": 2})),
            ],
        ),
        (
            catalog::HABITS,
            vec![rec(json!({"id": "h1", "name": "Meditate", "createdAt": "2024-01-01", "order": 0, "isActive": true, "targetPerWeek": 5}))],
        ),
        (
            catalog::HABIT_COMPLETIONS,
            vec![
                rec(json!({"id": "hc1", "habitId": "h1", "completedAt": "2024-03-01T07:00:00Z", "note": null})),
                rec(json!({"id": "hc2", "habitId": "h1", "completedAt": "2024-03-02T07:00:00Z", "note": "short one"})),
            ],
        ),
        (
            catalog::JOURNAL_ENTRIES,
            vec![rec(json!({"id": "j1", "content": "Good day ☀️", "createdAt": "2024-03-01T20:00:00Z", "mood": 4, "tags": ["run", "sun"]}))],
        ),
        (
            catalog::PULSE_TYPES,
            vec![rec(json!({"id": "p1", "name": "Energy", "unit": "pts", "minValue": 0, "maxValue": 10, "order": 0, "isActive": true}))],
        ),
        (
            catalog::PULSE_ENTRIES,
            vec![
                rec(json!({"id": "pe1", "pulseTypeId": "p1", "value": 7.5, "recordedAt": "2024-03-01T20:05:00Z", "journalEntryId": "j1"})),
                rec(json!({"id": "pe2", "pulseTypeId": "p1", "value": 3, "recordedAt": "2024-03-02T20:05:00Z", "journalEntryId": null})),
            ],
        ),
        (
            catalog::CHECKIN,
            vec![rec(json!({"id": "checkin", "frequency": "daily", "enabled": true, "nextDueAt": "2024-03-02T09:00:00Z", "streak": 5}))],
        ),
        (
            catalog::SETTINGS,
            vec![rec(json!({"id": "app", "theme": "dark", "notificationsEnabled": false, "aiApiKey": null}))],
        ),
    ]
}
