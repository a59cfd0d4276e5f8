//! Field-level comparison of quotation copies.

use crate::quotation::{Fields, Quotation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single before/after difference, as recorded in audit details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name. Top-level attributes use their wire name (`state`,
    /// `version`, `clientEmail`); content fields use their own key.
    pub field: String,
    /// Value before the write (`null` when absent).
    pub before: Value,
    /// Value after the write (`null` when absent).
    pub after: Value,
}

/// Returns the watched fields whose values differ between two copies.
///
/// Comparison is exact deep equality: arrays compare as ordered sequences
/// and a field present on one side only counts as different. The result
/// keeps the order of `watched`.
pub fn watched_differences<'a, I>(local: &Fields, server: &Fields, watched: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    watched
        .into_iter()
        .filter(|name| local.get(*name) != server.get(*name))
        .map(str::to_string)
        .collect()
}

/// Shallow per-field merge: keys present on both sides take the server's
/// value, one-sided keys are kept as they are.
pub fn merge_fields(local: &Fields, server: &Fields) -> Fields {
    let mut merged = local.clone();
    for (key, value) in server {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Computes the before/after diff between two versions of one record.
pub fn record_changes(before: &Quotation, after: &Quotation) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if before.state != after.state {
        changes.push(FieldChange {
            field: "state".into(),
            before: Value::from(before.state.as_str()),
            after: Value::from(after.state.as_str()),
        });
    }
    if before.version != after.version {
        changes.push(FieldChange {
            field: "version".into(),
            before: Value::from(before.version),
            after: Value::from(after.version),
        });
    }
    if before.client_email != after.client_email {
        changes.push(FieldChange {
            field: "clientEmail".into(),
            before: Value::from(before.client_email.clone()),
            after: Value::from(after.client_email.clone()),
        });
    }

    let keys = before
        .fields
        .keys()
        .chain(after.fields.keys().filter(|k| !before.fields.contains_key(*k)));
    for key in keys {
        let old = before.fields.get(key);
        let new = after.fields.get(key);
        if old != new {
            changes.push(FieldChange {
                field: key.clone(),
                before: old.cloned().unwrap_or(Value::Null),
                after: new.cloned().unwrap_or(Value::Null),
            });
        }
    }

    changes
}
