use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use trackline_backup::{
    catalog, BackupConfig, Exporter, ImportMode, Importer, ProviderSet, Validator,
};
use trackline_migrate::{BackupDocument, MigrationEngine, Record};
use trackline_store::MemoryCollection;

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// A v1 document with `n` goals, milestones, journal entries and pulses.
fn v1_document(n: usize) -> Value {
    let goals: Vec<Value> = (0..n)
        .map(|i| json!({"id": format!("g{i}"), "title": "goal", "createdAt": "2022-01-01"}))
        .collect();
    let milestones: Vec<Value> = (0..n)
        .map(|i| json!({"id": format!("m{i}"), "title": "step", "parentGoalId": format!("g{i}")}))
        .collect();
    let journal: Vec<Value> = (0..n)
        .map(|i| json!({"id": format!("j{i}"), "text": "entry", "createdAt": "2022-01-01"}))
        .collect();
    let pulses: Vec<Value> = (0..n)
        .map(|i| {
            json!({"id": format!("p{i}"), "pulseTypeId": "t", "value": i, "recordedAt": "2022-01-01"})
        })
        .collect();
    json!({
        "schemaVersion": 1,
        "exportedAt": "2022-06-01T00:00:00Z",
        "collections": {
            "goals": goals,
            "milestones": milestones,
            "journalEntries": journal,
            "pulseEntries": pulses,
            "settings": [{"id": "app", "apiKey": "secret"}]
        }
    })
}

fn bench_validate(c: &mut Criterion) {
    let registry = catalog::builtin_registry().unwrap();
    let doc = v1_document(1000);
    c.bench_function("Validator::validate 4k records", |b| {
        b.iter(|| black_box(Validator::new(&registry).validate(&doc)))
    });
}

fn bench_migrate(c: &mut Criterion) {
    let registry = catalog::builtin_registry().unwrap();
    let doc = BackupDocument::from_value(v1_document(1000)).unwrap();
    let engine = MigrationEngine::new(&registry);
    c.bench_function("MigrationEngine::migrate v1->v3 4k records", |b| {
        b.iter(|| black_box(engine.migrate(doc.clone()).unwrap()))
    });
}

fn bench_export(c: &mut Criterion) {
    let registry = Arc::new(catalog::builtin_registry().unwrap());
    let goals = MemoryCollection::new(catalog::GOALS).with_records(
        (0..5000)
            .map(|i| {
                rec(json!({"id": format!("g{i}"), "title": "goal", "createdAt": "2024-01-01", "order": i, "isActive": true}))
            })
            .collect(),
    );
    let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name))
        .with(Arc::new(goals));
    let exporter = Exporter::new(registry, providers, BackupConfig::default()).unwrap();

    c.bench_function("Exporter::export_bytes 5k goals", |b| {
        b.iter(|| black_box(exporter.export_bytes().unwrap()))
    });
}

fn bench_import(c: &mut Criterion) {
    let registry = Arc::new(catalog::builtin_registry().unwrap());
    let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name));
    let importer = Importer::new(registry, providers, BackupConfig::default()).unwrap();
    let raw = serde_json::to_vec(&v1_document(1000)).unwrap();

    c.bench_function("Importer::import_document v1 4k records", |b| {
        b.iter(|| {
            let report = importer
                .import_document(&raw, ImportMode::Replace)
                .unwrap();
            black_box(report.records_applied())
        })
    });

    // Merge into already-populated collections
    c.bench_function("Importer::import_document merge 4k records", |b| {
        b.iter(|| {
            let report = importer.import_document(&raw, ImportMode::Merge).unwrap();
            black_box(report.records_applied())
        })
    });
}

criterion_group!(
    benches,
    bench_validate,
    bench_migrate,
    bench_export,
    bench_import,
);
criterion_main!(benches);
