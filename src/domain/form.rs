// Copyright (c) 2025 - Cowboy AI, Inc.
//! Form submissions
//!
//! A [`FormSubmission`] is the immutable unit of the event log: an intent
//! to change one entity, carrying its own guid for idempotency. The JSON
//! encoding is the on-wire form exchanged between clients and servers and
//! is frozen: field names exactly as declared here, `syncLevel` as the
//! integer 0/1/2, timestamps as RFC 3339 UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{EngineError, EngineResult};

use super::SyncLevel;

/// Built-in event type tags
///
/// User-registered tags dispatch through the same registry; this set is
/// what the engine ships appliers for.
pub mod event_types {
    pub const CREATE_INDIVIDUAL: &str = "create-individual";
    pub const CREATE_GROUP: &str = "create-group";
    pub const UPDATE_INDIVIDUAL: &str = "update-individual";
    pub const UPDATE_GROUP: &str = "update-group";
    pub const ADD_MEMBER: &str = "add-member";
    pub const REMOVE_MEMBER: &str = "remove-member";
    pub const DELETE_ENTITY: &str = "delete-entity";
    pub const RESOLVE_DUPLICATE: &str = "resolve-duplicate";
}

/// An immutable form submission, the unit of the event log
///
/// # Invariants
/// - `guid`, `entity_guid`, `event_type`, `user_id` are non-empty
/// - `data` is non-empty
/// - `guid` is unique per store; a resubmission with a known guid is
///   silently dropped by the event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    /// Unique form id, used for idempotency
    pub guid: String,

    /// Target entity guid (may not exist yet for a create event)
    pub entity_guid: String,

    /// Event type tag, e.g. `create-individual`
    #[serde(rename = "type")]
    pub event_type: String,

    /// Opaque key-value payload
    pub data: Map<String, Value>,

    /// Creation time, RFC 3339 UTC
    pub timestamp: DateTime<Utc>,

    /// Actor identifier
    pub user_id: String,

    /// Current propagation level
    pub sync_level: SyncLevel,
}

impl FormSubmission {
    /// Validate the submission invariants
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] naming the first offending
    /// field.
    pub fn validate(&self) -> EngineResult<()> {
        if self.guid.trim().is_empty() {
            return Err(EngineError::Validation("form guid must not be empty".into()));
        }
        if self.entity_guid.trim().is_empty() {
            return Err(EngineError::Validation(
                "entityGuid must not be empty".into(),
            ));
        }
        if self.event_type.trim().is_empty() {
            return Err(EngineError::Validation("type must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(EngineError::Validation("userId must not be empty".into()));
        }
        if self.data.is_empty() {
            return Err(EngineError::Validation("data must not be empty".into()));
        }
        Ok(())
    }

    /// Canonical encoding used as the Merkle leaf pre-image
    ///
    /// Fields serialize in declaration order with no whitespace, so the
    /// same submission always produces the same bytes.
    pub fn canonical_bytes(&self) -> EngineResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(EngineError::from)
    }

    /// Convenience accessor for a string field in `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FormSubmission {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("John"));
        data.insert("age".to_string(), json!(30));
        FormSubmission {
            guid: "form-1".to_string(),
            entity_guid: "P1".to_string(),
            event_type: event_types::CREATE_INDIVIDUAL.to_string(),
            data,
            timestamp: "2026-01-19T12:00:00Z".parse().unwrap(),
            user_id: "user-1".to_string(),
            sync_level: SyncLevel::Local,
        }
    }

    #[test]
    fn test_valid_submission_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut form = sample();
        form.entity_guid = String::new();
        assert!(matches!(
            form.validate(),
            Err(EngineError::Validation(_))
        ));

        let mut form = sample();
        form.data = Map::new();
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_wire_field_names_are_frozen() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["guid", "entityGuid", "type", "data", "timestamp", "userId", "syncLevel"] {
            assert!(obj.contains_key(key), "missing wire field {}", key);
        }
        assert_eq!(obj["syncLevel"], json!(0));
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let a = sample().canonical_bytes().unwrap();
        let b = sample().canonical_bytes().unwrap();
        assert_eq!(a, b);
    }
}
