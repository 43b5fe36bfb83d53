//! Sensitive-field redaction.
//!
//! Exports never carry a secret in plaintext: every sensitive field that
//! holds a value is written as [`REDACTED_SENTINEL`]. The field itself stays
//! in the record so later importers still see the shape.
//!
//! Imports never replace a secret the user already has configured. When no
//! local value exists, an incoming value is accepted unless it is the
//! sentinel, which becomes `null`.

use std::collections::BTreeMap;

use serde_json::Value;
use trackline_migrate::Record;
use trackline_store::{CollectionProvider, ProviderError};

/// Value written in place of a secret.
pub const REDACTED_SENTINEL: &str = "***REDACTED***";

/// True if `value` is the redaction sentinel.
pub fn is_redacted(value: &Value) -> bool {
    value.as_str() == Some(REDACTED_SENTINEL)
}

/// Mask every non-null sensitive field of `record`.
///
/// Absent and `null` fields are left alone: there is nothing to withhold.
pub fn redact_for_export(mut record: Record, sensitive_fields: &[&str]) -> Record {
    for field in sensitive_fields {
        if let Some(value) = record.get_mut(*field) {
            if !value.is_null() {
                *value = Value::String(REDACTED_SENTINEL.to_string());
            }
        }
    }
    record
}

/// Number of fields [`redact_for_export`] would mask in `record`.
pub fn redactable_count(record: &Record, sensitive_fields: &[&str]) -> usize {
    sensitive_fields
        .iter()
        .filter(|f| record.get(**f).is_some_and(|v| !v.is_null()))
        .count()
}

/// Locally configured values of a collection's sensitive fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSecrets {
    values: BTreeMap<String, Value>,
}

impl LocalSecrets {
    /// Ask `provider` for the current value of each field in `fields`.
    pub fn load(
        provider: &dyn CollectionProvider,
        fields: &[&str],
    ) -> Result<Self, ProviderError> {
        let mut values = BTreeMap::new();
        for field in fields {
            if let Some(value) = provider.current_sensitive_value(field)? {
                if !value.is_null() {
                    values.insert((*field).to_string(), value);
                }
            }
        }
        Ok(Self { values })
    }

    /// Set a local value directly.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// The local value of `field`, if one is configured.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Decide the value of every sensitive field of an incoming record.
///
/// A configured local value always wins. Otherwise the incoming value is
/// kept, except that the sentinel is replaced with `null`.
pub fn reconcile_for_import(
    mut record: Record,
    sensitive_fields: &[&str],
    local: &LocalSecrets,
) -> Record {
    for field in sensitive_fields {
        if let Some(value) = local.get(field) {
            record.insert((*field).to_string(), value.clone());
        } else if let Some(incoming) = record.get_mut(*field) {
            if is_redacted(incoming) {
                *incoming = Value::Null;
            }
        }
    }
    record
}
