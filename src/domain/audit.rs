// Copyright (c) 2025 - Cowboy AI, Inc.
//! Audit log entries
//!
//! Every applied event writes exactly one immutable [`AuditLogEntry`]
//! per modified entity. The entries for one entity, ordered by
//! timestamp, form its audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SyncLevel;

/// A structured before/after record for one modified field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// Dotted field path, e.g. `data.name`
    pub field: String,

    /// Previous value, absent for newly set fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,

    /// New value, absent for removed fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// One immutable audit entry per applied event and modified entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Unique audit id
    pub guid: String,

    /// Guid of the form that caused this change
    pub event_guid: String,

    /// Guid of the modified entity
    pub entity_guid: String,

    /// Event type of the causing form
    pub action: String,

    /// Actor identifier
    pub user_id: String,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Structured diff of modified fields
    pub changes: Vec<FieldChange>,

    /// Propagation level of the causing event at write time
    pub sync_level: SyncLevel,
}

/// Compute the shallow field-level diff between two payloads
///
/// Keys present only in `new` report no `old` value; keys present only
/// in `old` report no `new` value; unchanged keys are omitted.
pub fn diff_data(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            old_value => changes.push(FieldChange {
                field: format!("data.{}", key),
                old: old_value.cloned(),
                new: Some(new_value.clone()),
            }),
        }
    }
    for (key, old_value) in old {
        if !new.contains_key(key) {
            changes.push(FieldChange {
                field: format!("data.{}", key),
                old: Some(old_value.clone()),
                new: None,
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_diff_reports_added_changed_removed() {
        let old = map(&[("name", json!("John")), ("age", json!(30))]);
        let new = map(&[("name", json!("Johnny")), ("city", json!("Dili"))]);

        let changes = diff_data(&old, &new);

        let changed: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert!(changed.contains(&"data.name"));
        assert!(changed.contains(&"data.city"));
        assert!(changed.contains(&"data.age"));
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_diff_omits_unchanged() {
        let old = map(&[("name", json!("John"))]);
        let new = map(&[("name", json!("John"))]);
        assert!(diff_data(&old, &new).is_empty());
    }
}
