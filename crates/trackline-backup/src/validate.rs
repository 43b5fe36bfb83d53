//! Structural validation of raw backup documents.

use std::collections::HashSet;
use std::fmt;

use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use trackline_migrate::{describe_value, SchemaRegistry, ID_FIELD, ORDER_FIELD};

pub(crate) const SCHEMA_VERSION_KEY: &str = "schemaVersion";
pub(crate) const EXPORTED_AT_KEY: &str = "exportedAt";
pub(crate) const COLLECTIONS_KEY: &str = "collections";

/// How serious a [`ValidationIssue`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The whole document must be rejected.
    Fatal,
    /// Informational; import proceeds.
    Warning,
    /// One record must be skipped; its siblings still import.
    Record,
}

/// One finding of the [`Validator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Collection the issue belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Offending record's id, or `#<index>` when it has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Position of the offending record within its collection.
    #[serde(skip)]
    pub record_index: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    /// A document-level fatal issue.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            collection: None,
            record_id: None,
            record_index: None,
            message: message.into(),
        }
    }

    fn collection_fatal(collection: &str, message: String) -> Self {
        Self {
            collection: Some(collection.to_string()),
            ..Self::fatal(message)
        }
    }

    fn warning(collection: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            collection: Some(collection.to_string()),
            record_id: None,
            record_index: None,
            message,
        }
    }

    fn record(collection: &str, record_id: String, index: usize, message: String) -> Self {
        Self {
            severity: Severity::Record,
            collection: Some(collection.to_string()),
            record_id: Some(record_id),
            record_index: Some(index),
            message,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.collection, &self.record_id) {
            (Some(c), Some(id)) => write!(f, "{c}/{id}: {}", self.message),
            (Some(c), None) => write!(f, "{c}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Everything the [`Validator`] found in one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// The document's `schemaVersion`, when it could be read.
    pub declared_version: Option<u32>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when nothing at all was found.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// True when the document must be rejected.
    pub fn has_fatal(&self) -> bool {
        self.fatal().next().is_some()
    }

    pub fn fatal(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Warning)
    }

    pub fn record_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Record)
    }

    /// Record issues of one collection.
    pub fn rejected_in<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.record_issues()
            .filter(move |i| i.collection.as_deref() == Some(collection))
    }

    fn of(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }
}

/// Checks raw documents against a [`SchemaRegistry`].
///
/// Records are checked against the shape of the version the document
/// declares, so an old document is judged by the rules it was written under.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trackline_backup::{catalog, Validator};
///
/// let registry = catalog::builtin_registry().unwrap();
/// let report = Validator::new(&registry).validate(&json!({
///     "schemaVersion": 3,
///     "exportedAt": "2024-05-01T08:00:00Z",
///     "collections": { "goals": [ { "id": "g1" } ] }
/// }));
///
/// assert!(!report.has_fatal());
/// assert_eq!(report.record_issues().count(), 1);
/// ```
pub struct Validator<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validate a parsed document.
    pub fn validate(&self, document: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(top) = document.as_object() else {
            report.push(ValidationIssue::fatal(format!(
                "document must be a mapping, got {}",
                describe_value(document)
            )));
            return report;
        };

        let version = match top.get(SCHEMA_VERSION_KEY) {
            None | Some(Value::Null) => {
                report.push(ValidationIssue::fatal("missing `schemaVersion`"));
                return report;
            }
            Some(value) => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                Some(version) => version,
                None => {
                    report.push(ValidationIssue::fatal(format!(
                        "`schemaVersion` must be a non-negative integer, got {value}"
                    )));
                    return report;
                }
            },
        };
        report.declared_version = Some(version);

        if !self.registry.is_supported(version) {
            report.push(ValidationIssue::fatal(format!(
                "unsupported schema version v{version} (readable: v{}..=v{})",
                self.registry.min_supported_version(),
                self.registry.current_version()
            )));
            return report;
        }

        match top.get(EXPORTED_AT_KEY) {
            Some(Value::String(s)) if DateTime::parse_from_rfc3339(s).is_ok() => {}
            None => report.push(ValidationIssue::fatal("missing `exportedAt`")),
            Some(other) => report.push(ValidationIssue::fatal(format!(
                "`exportedAt` must be an RFC 3339 timestamp, got {other}"
            ))),
        }

        match top.get(COLLECTIONS_KEY) {
            Some(Value::Object(collections)) => {
                for (name, records) in collections {
                    self.validate_collection(version, name, records, &mut report);
                }
            }
            None => report.push(ValidationIssue::fatal("missing `collections`")),
            Some(other) => report.push(ValidationIssue::fatal(format!(
                "`collections` must be a mapping, got {}",
                describe_value(other)
            ))),
        }

        report
    }

    fn validate_collection(
        &self,
        version: u32,
        name: &str,
        records: &Value,
        report: &mut ValidationReport,
    ) {
        let Some(schema) = self.registry.get(name).filter(|s| s.exists_at(version)) else {
            report.push(ValidationIssue::warning(
                name,
                format!("unrecognized collection at v{version}; it will be ignored"),
            ));
            return;
        };
        let Value::Array(records) = records else {
            report.push(ValidationIssue::collection_fatal(
                name,
                format!("collection must be a sequence, got {}", describe_value(records)),
            ));
            return;
        };
        let shape = schema.shape_at(version);

        let mut seen = HashSet::new();
        for (index, value) in records.iter().enumerate() {
            let Value::Object(record) = value else {
                report.push(ValidationIssue::record(
                    name,
                    format!("#{index}"),
                    index,
                    format!("record must be a mapping, got {}", describe_value(value)),
                ));
                continue;
            };

            let mut reasons = Vec::new();
            let id = check_id(record, &mut reasons);
            if let Some(id) = id {
                if !seen.insert(id) {
                    reasons.push(format!("duplicate id `{id}`"));
                }
            }
            if let Some(shape) = shape {
                reasons.extend(shape.fields().iter().filter_map(|f| f.check(record)));
                if shape.has_field(ORDER_FIELD) {
                    if let Some(order) = record.get(ORDER_FIELD).and_then(Value::as_i64) {
                        if order < 0 {
                            reasons.push(format!(
                                "field `{ORDER_FIELD}` must be non-negative, got {order}"
                            ));
                        }
                    }
                }
            }

            if !reasons.is_empty() {
                let record_id = id.map_or_else(|| format!("#{index}"), str::to_owned);
                report.push(ValidationIssue::record(
                    name,
                    record_id,
                    index,
                    reasons.join("; "),
                ));
            }
        }
    }
}

fn check_id<'r>(record: &'r Map<String, Value>, reasons: &mut Vec<String>) -> Option<&'r str> {
    match record.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::String(_)) => {
            reasons.push(format!("field `{ID_FIELD}` must not be empty"));
            None
        }
        None | Some(Value::Null) => {
            reasons.push(format!("missing required field `{ID_FIELD}`"));
            None
        }
        Some(other) => {
            reasons.push(format!(
                "field `{ID_FIELD}` must be a string, got {}",
                describe_value(other)
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use serde_json::json;

    fn validate(doc: Value) -> ValidationReport {
        let registry = catalog::builtin_registry().unwrap();
        Validator::new(&registry).validate(&doc)
    }

    fn doc(version: u32, collections: Value) -> Value {
        json!({
            "schemaVersion": version,
            "exportedAt": "2024-05-01T08:00:00Z",
            "collections": collections,
        })
    }

    #[test]
    fn empty_current_document_is_clean() {
        let report = validate(doc(3, json!({})));
        assert!(report.is_empty(), "{:?}", report.issues);
        assert_eq!(report.declared_version, Some(3));
    }

    #[test]
    fn non_mapping_is_fatal_and_short_circuits() {
        let report = validate(json!([1, 2, 3]));
        assert_eq!(report.issues.len(), 1);
        assert!(report.has_fatal());
        assert_eq!(report.declared_version, None);
    }

    #[test]
    fn missing_version_short_circuits() {
        let report = validate(json!({ "collections": 5 }));
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message.contains("schemaVersion"));
    }

    #[test]
    fn future_version_is_fatal() {
        let report = validate(doc(4, json!({})));
        assert!(report.has_fatal());
        assert_eq!(report.declared_version, Some(4));
    }

    #[test]
    fn negative_version_is_fatal() {
        let report = validate(json!({ "schemaVersion": -1, "exportedAt": "x", "collections": {} }));
        assert!(report.has_fatal());
        assert_eq!(report.declared_version, None);
    }

    #[test]
    fn bad_timestamp_and_collections_are_fatal() {
        let report = validate(json!({
            "schemaVersion": 3,
            "exportedAt": "yesterday",
            "collections": []
        }));
        assert_eq!(report.fatal().count(), 2);
    }

    #[test]
    fn unknown_collection_is_a_warning() {
        let report = validate(doc(3, json!({ "recipes": [{ "id": "r" }] })));
        assert!(!report.has_fatal());
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.warnings().next().unwrap().collection.as_deref(), Some("recipes"));
    }

    #[test]
    fn collection_from_a_later_version_is_a_warning() {
        let report = validate(doc(1, json!({ "checkin": [] })));
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn collection_that_is_not_a_sequence_is_fatal() {
        let report = validate(doc(3, json!({ "goals": { "id": "g1" } })));
        assert!(report.has_fatal());
    }

    #[test]
    fn records_are_checked_against_declared_version() {
        // `text` is the v1 name of the journal body.
        let v1 = validate(doc(
            1,
            json!({ "journalEntries": [{ "id": "j", "text": "hi", "createdAt": "2023-01-01" }] }),
        ));
        assert!(v1.is_empty(), "{:?}", v1.issues);

        let v3 = validate(doc(
            3,
            json!({ "journalEntries": [{ "id": "j", "text": "hi", "createdAt": "2023-01-01" }] }),
        ));
        assert_eq!(v3.record_issues().count(), 1);
        assert!(v3.issues[0].message.contains("content"));
    }

    #[test]
    fn one_issue_per_bad_record() {
        let report = validate(doc(
            3,
            json!({ "goals": [
                { "id": "g1", "title": 7, "createdAt": "nope", "order": 0, "isActive": true },
                { "title": "no id", "createdAt": "2024-01-01", "order": 0, "isActive": true },
            ]}),
        ));
        let issues: Vec<_> = report.record_issues().collect();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record_id.as_deref(), Some("g1"));
        assert!(issues[0].message.contains("title"));
        assert!(issues[0].message.contains("createdAt"));
        assert_eq!(issues[1].record_id.as_deref(), Some("#1"));
        assert_eq!(issues[1].record_index, Some(1));
    }

    #[test]
    fn later_duplicate_is_rejected() {
        let goal = json!({ "id": "g1", "title": "t", "createdAt": "2024-01-01", "order": 0, "isActive": true });
        let report = validate(doc(3, json!({ "goals": [goal.clone(), goal] })));
        let issues: Vec<_> = report.rejected_in("goals").collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, Some(1));
        assert!(issues[0].message.contains("duplicate"));
    }

    #[test]
    fn negative_order_is_rejected_but_gaps_are_fine() {
        let goal = |id: &str, order: i64| {
            json!({ "id": id, "title": "t", "createdAt": "2024-01-01", "order": order, "isActive": true })
        };
        let report = validate(doc(
            3,
            json!({ "goals": [goal("a", 0), goal("b", 0), goal("c", 7), goal("d", -1)] }),
        ));
        let issues: Vec<_> = report.record_issues().collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_id.as_deref(), Some("d"));
    }

    #[test]
    fn order_is_not_checked_where_undeclared() {
        let report = validate(doc(
            1,
            json!({ "goals": [{ "id": "g", "title": "t", "createdAt": "2024-01-01", "order": -3 }] }),
        ));
        assert!(report.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn issues_display_with_location() {
        let issue = ValidationIssue::record("goals", "g1".into(), 0, "bad".into());
        assert_eq!(issue.to_string(), "goals/g1: bad");
        assert_eq!(ValidationIssue::fatal("boom").to_string(), "boom");
    }
}
