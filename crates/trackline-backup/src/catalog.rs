//! The built-in collection catalog.
//!
//! Every collection trackline persists, with its record shape at each
//! schema version and the steps that carry records forward.
//!
//! | Version | Changes |
//! |---------|---------|
//! | v1 | goals, milestones, habits, habitCompletions, journalEntries, pulseTypes, pulseEntries, settings |
//! | v2 | `order`/`isActive` on goals, habits, pulseTypes; `order` on milestones; journal `text` → `content`; pulse entries link journal entries; `checkin` added |
//! | v3 | milestone `parentGoalId` → `goalId`; settings `apiKey` → `aiApiKey` plus `notificationsEnabled`; completion `note`; check-in `streak` |

use trackline_migrate::{
    CollectionSchema, FieldKind, FieldSpec, RecordShape, RecordStep, RegistryError, SchemaRegistry,
};

/// The schema version this build writes.
pub const CURRENT_VERSION: u32 = 3;
/// The oldest schema version this build still reads.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

pub const GOALS: &str = "goals";
pub const MILESTONES: &str = "milestones";
pub const HABITS: &str = "habits";
pub const HABIT_COMPLETIONS: &str = "habitCompletions";
pub const JOURNAL_ENTRIES: &str = "journalEntries";
pub const PULSE_TYPES: &str = "pulseTypes";
pub const PULSE_ENTRIES: &str = "pulseEntries";
pub const CHECKIN: &str = "checkin";
pub const SETTINGS: &str = "settings";

/// All catalog collection names, in declaration order.
pub const COLLECTIONS: [&str; 9] = [
    GOALS,
    MILESTONES,
    HABITS,
    HABIT_COMPLETIONS,
    JOURNAL_ENTRIES,
    PULSE_TYPES,
    PULSE_ENTRIES,
    CHECKIN,
    SETTINGS,
];

/// Build the registry for the built-in catalog.
pub fn builtin_registry() -> Result<SchemaRegistry, RegistryError> {
    SchemaRegistry::builder(CURRENT_VERSION)
        .min_supported_version(MIN_SUPPORTED_VERSION)
        .collection(goals())
        .collection(milestones())
        .collection(habits())
        .collection(habit_completions())
        .collection(journal_entries())
        .collection(pulse_types())
        .collection(pulse_entries())
        .collection(checkin())
        .collection(settings())
        .build()
}

/// `order` and `isActive`, added to sortable collections in v2.
fn ordering_fields() -> [FieldSpec; 2] {
    [
        FieldSpec::required("order", FieldKind::Integer),
        FieldSpec::required("isActive", FieldKind::Boolean),
    ]
}

fn with_fields(base: &[FieldSpec], extra: impl IntoIterator<Item = FieldSpec>) -> RecordShape {
    RecordShape::new(base.iter().cloned().chain(extra).collect())
}

fn goals() -> CollectionSchema {
    let v1 = [
        FieldSpec::required("title", FieldKind::String),
        FieldSpec::optional("description", FieldKind::String),
        FieldSpec::optional("targetDate", FieldKind::Timestamp),
        FieldSpec::optional("completed", FieldKind::Boolean),
        FieldSpec::required("createdAt", FieldKind::Timestamp),
    ];
    CollectionSchema::new(GOALS)
        .shape(1, RecordShape::new(v1.to_vec()))
        .shape(2, with_fields(&v1, ordering_fields()))
        .step(
            RecordStep::new(GOALS, 1, 2)
                .add_default("order", 0)
                .add_default("isActive", true),
        )
        .step(RecordStep::passthrough(GOALS, 2, 3))
}

fn milestones() -> CollectionSchema {
    let common = [
        FieldSpec::required("title", FieldKind::String),
        FieldSpec::optional("completed", FieldKind::Boolean),
        FieldSpec::optional("dueDate", FieldKind::Timestamp),
    ];
    let parent = FieldSpec::required("parentGoalId", FieldKind::String).references(GOALS);
    let order = FieldSpec::required("order", FieldKind::Integer);
    CollectionSchema::new(MILESTONES)
        .shape(1, with_fields(&common, [parent.clone()]))
        .shape(2, with_fields(&common, [parent, order.clone()]))
        .shape(
            3,
            with_fields(
                &common,
                [
                    FieldSpec::required("goalId", FieldKind::String).references(GOALS),
                    order,
                ],
            ),
        )
        .step(RecordStep::new(MILESTONES, 1, 2).add_default("order", 0))
        .step(RecordStep::new(MILESTONES, 2, 3).rename("parentGoalId", "goalId"))
}

fn habits() -> CollectionSchema {
    let v1 = [
        FieldSpec::required("name", FieldKind::String),
        FieldSpec::optional("description", FieldKind::String),
        FieldSpec::optional("targetPerWeek", FieldKind::Integer),
        FieldSpec::required("createdAt", FieldKind::Timestamp),
    ];
    CollectionSchema::new(HABITS)
        .shape(1, RecordShape::new(v1.to_vec()))
        .shape(2, with_fields(&v1, ordering_fields()))
        .step(
            RecordStep::new(HABITS, 1, 2)
                .add_default("order", 0)
                .add_default("isActive", true),
        )
        .step(RecordStep::passthrough(HABITS, 2, 3))
}

fn habit_completions() -> CollectionSchema {
    let v1 = [
        FieldSpec::required("habitId", FieldKind::String).references(HABITS),
        FieldSpec::required("completedAt", FieldKind::Timestamp),
    ];
    CollectionSchema::new(HABIT_COMPLETIONS)
        .shape(1, RecordShape::new(v1.to_vec()))
        .shape(
            3,
            with_fields(&v1, [FieldSpec::optional("note", FieldKind::String)]),
        )
        .step(RecordStep::passthrough(HABIT_COMPLETIONS, 1, 2))
        .step(RecordStep::new(HABIT_COMPLETIONS, 2, 3).add_default("note", serde_json::Value::Null))
}

fn journal_entries() -> CollectionSchema {
    let common = [
        FieldSpec::required("createdAt", FieldKind::Timestamp),
        FieldSpec::optional("mood", FieldKind::Integer),
        FieldSpec::optional("tags", FieldKind::Sequence),
    ];
    CollectionSchema::new(JOURNAL_ENTRIES)
        .shape(
            1,
            with_fields(&common, [FieldSpec::required("text", FieldKind::String)]),
        )
        .shape(
            2,
            with_fields(&common, [FieldSpec::required("content", FieldKind::String)]),
        )
        .step(RecordStep::new(JOURNAL_ENTRIES, 1, 2).rename("text", "content"))
        .step(RecordStep::passthrough(JOURNAL_ENTRIES, 2, 3))
}

fn pulse_types() -> CollectionSchema {
    let v1 = [
        FieldSpec::required("name", FieldKind::String),
        FieldSpec::optional("unit", FieldKind::String),
        FieldSpec::optional("minValue", FieldKind::Number),
        FieldSpec::optional("maxValue", FieldKind::Number),
    ];
    CollectionSchema::new(PULSE_TYPES)
        .shape(1, RecordShape::new(v1.to_vec()))
        .shape(2, with_fields(&v1, ordering_fields()))
        .step(
            RecordStep::new(PULSE_TYPES, 1, 2)
                .add_default("order", 0)
                .add_default("isActive", true),
        )
        .step(RecordStep::passthrough(PULSE_TYPES, 2, 3))
}

fn pulse_entries() -> CollectionSchema {
    let v1 = [
        FieldSpec::required("pulseTypeId", FieldKind::String).references(PULSE_TYPES),
        FieldSpec::required("value", FieldKind::Number),
        FieldSpec::required("recordedAt", FieldKind::Timestamp),
    ];
    CollectionSchema::new(PULSE_ENTRIES)
        .shape(1, RecordShape::new(v1.to_vec()))
        .shape(
            2,
            with_fields(
                &v1,
                [FieldSpec::optional("journalEntryId", FieldKind::String).references(JOURNAL_ENTRIES)],
            ),
        )
        .step(
            RecordStep::new(PULSE_ENTRIES, 1, 2)
                .add_default("journalEntryId", serde_json::Value::Null),
        )
        .step(RecordStep::passthrough(PULSE_ENTRIES, 2, 3))
}

fn checkin() -> CollectionSchema {
    let v2 = [
        FieldSpec::required("frequency", FieldKind::String),
        FieldSpec::required("enabled", FieldKind::Boolean),
        FieldSpec::optional("nextDueAt", FieldKind::Timestamp),
    ];
    CollectionSchema::new(CHECKIN)
        .introduced_in(2)
        .shape(2, RecordShape::new(v2.to_vec()))
        .shape(
            3,
            with_fields(&v2, [FieldSpec::required("streak", FieldKind::Integer)]),
        )
        .step(RecordStep::new(CHECKIN, 2, 3).add_default("streak", 0))
}

fn settings() -> CollectionSchema {
    let theme = FieldSpec::optional("theme", FieldKind::String);
    CollectionSchema::new(SETTINGS)
        .shape(
            1,
            RecordShape::new(vec![
                FieldSpec::optional("apiKey", FieldKind::String).sensitive(),
                theme.clone(),
            ]),
        )
        .shape(
            3,
            RecordShape::new(vec![
                FieldSpec::optional("aiApiKey", FieldKind::String).sensitive(),
                theme,
                FieldSpec::required("notificationsEnabled", FieldKind::Boolean),
            ]),
        )
        .step(RecordStep::passthrough(SETTINGS, 1, 2))
        .step(
            RecordStep::new(SETTINGS, 2, 3)
                .rename("apiKey", "aiApiKey")
                .add_default("notificationsEnabled", true),
        )
}
