use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Record;

/// Coarse value type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// JSON number without a fractional part.
    Integer,
    /// JSON boolean.
    Boolean,
    /// RFC 3339 timestamp or `YYYY-MM-DD` date, as a string.
    Timestamp,
    /// JSON object.
    Mapping,
    /// JSON array.
    Sequence,
}

impl FieldKind {
    /// Whether `value` has this coarse type. `null` never matches.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Timestamp => value.as_str().is_some_and(is_timestamp),
            Self::Mapping => value.is_object(),
            Self::Sequence => value.is_array(),
        }
    }

    /// Lowercase name used in validation messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Mapping => "mapping",
            Self::Sequence => "sequence",
        }
    }
}

fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Name of the JSON type of `value`, for messages.
pub fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Declaration of one field of a record shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name as it appears on the wire.
    pub name: String,
    /// Coarse type.
    pub kind: FieldKind,
    /// Required fields must be present and non-null.
    pub required: bool,
    /// Sensitive fields are redacted on export and reconciled on import.
    pub sensitive: bool,
    /// Collection whose record ids this field holds. Never resolved.
    pub references: Option<String>,
}

impl FieldSpec {
    /// A field that must be present and non-null.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            sensitive: false,
            references: None,
        }
    }

    /// A field that may be absent or null.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    /// Mark the field as holding a secret.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Declare that the field holds ids of records in `collection`.
    pub fn references(mut self, collection: impl Into<String>) -> Self {
        self.references = Some(collection.into());
        self
    }

    /// Check the field on `record`. Returns the reason when it does not conform.
    pub fn check(&self, record: &Record) -> Option<String> {
        match record.get(&self.name) {
            None | Some(Value::Null) if self.required => {
                Some(format!("missing required field `{}`", self.name))
            }
            None | Some(Value::Null) => None,
            Some(value) if self.kind.matches(value) => None,
            Some(value) => Some(format!(
                "field `{}` must be a {}, got {}",
                self.name,
                self.kind.name(),
                describe_value(value)
            )),
        }
    }
}

/// The declared shape of a collection's records at one schema version.
///
/// The `id` field is implied and need not be listed. Fields not declared
/// here are tolerated and carried through unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordShape {
    fields: Vec<FieldSpec>,
}

impl RecordShape {
    /// Create a shape from its field declarations.
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// All declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the shape declares `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Names of the fields marked sensitive.
    pub fn sensitive_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.sensitive)
            .map(|f| f.name.as_str())
    }

    /// `(field, target collection)` pairs for reference fields.
    pub fn references(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.references.as_deref().map(|t| (f.name.as_str(), t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn kinds_match_coarse_types() {
        assert!(FieldKind::String.matches(&json!("x")));
        assert!(FieldKind::Number.matches(&json!(1.5)));
        assert!(FieldKind::Number.matches(&json!(3)));
        assert!(FieldKind::Integer.matches(&json!(3)));
        assert!(FieldKind::Integer.matches(&json!(-3)));
        assert!(!FieldKind::Integer.matches(&json!(1.5)));
        assert!(FieldKind::Boolean.matches(&json!(false)));
        assert!(FieldKind::Mapping.matches(&json!({})));
        assert!(FieldKind::Sequence.matches(&json!([])));
        assert!(!FieldKind::String.matches(&Value::Null));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_dates() {
        assert!(FieldKind::Timestamp.matches(&json!("2024-03-01T10:00:00Z")));
        assert!(FieldKind::Timestamp.matches(&json!("2024-03-01T10:00:00.123+02:00")));
        assert!(FieldKind::Timestamp.matches(&json!("2024-03-01")));
        assert!(!FieldKind::Timestamp.matches(&json!("yesterday")));
        assert!(!FieldKind::Timestamp.matches(&json!(1_700_000_000)));
    }

    #[test]
    fn required_field_rejects_missing_and_null() {
        let spec = FieldSpec::required("title", FieldKind::String);
        assert!(spec.check(&record(json!({}))).is_some());
        assert!(spec.check(&record(json!({ "title": null }))).is_some());
        assert!(spec.check(&record(json!({ "title": "ok" }))).is_none());
    }

    #[test]
    fn optional_field_accepts_missing_and_null() {
        let spec = FieldSpec::optional("note", FieldKind::String);
        assert!(spec.check(&record(json!({}))).is_none());
        assert!(spec.check(&record(json!({ "note": null }))).is_none());
        let reason = spec.check(&record(json!({ "note": 4 }))).unwrap();
        assert_eq!(reason, "field `note` must be a string, got number");
    }

    #[test]
    fn shape_lists_sensitive_and_reference_fields() {
        let shape = RecordShape::new(vec![
            FieldSpec::optional("apiKey", FieldKind::String).sensitive(),
            FieldSpec::required("goalId", FieldKind::String).references("goals"),
            FieldSpec::optional("theme", FieldKind::String),
        ]);
        assert_eq!(shape.sensitive_fields().collect::<Vec<_>>(), vec!["apiKey"]);
        assert_eq!(
            shape.references().collect::<Vec<_>>(),
            vec![("goalId", "goals")]
        );
        assert!(shape.has_field("theme"));
        assert!(!shape.has_field("id"));
    }
}
