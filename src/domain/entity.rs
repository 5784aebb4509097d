// Copyright (c) 2025 - Cowboy AI, Inc.
//! Materialized entity state
//!
//! An [`Entity`] is the current state derived from the ordered event
//! log. Entities are created by an event, mutated by later events, and
//! tombstoned by a delete event; a tombstoned entity stays queryable
//! through the audit trail but is excluded from default queries and from
//! group member views.
//!
//! # Group membership
//!
//! Group to individual membership is stored as an ordered list of guids,
//! never as a pointer graph. All traversal goes through the entity
//! store, which keeps ownership acyclic and tenant-scoped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{EngineError, EngineResult};

/// Entity variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A single person
    Individual,
    /// A household or other grouping of individuals
    Group,
}

/// Materialized state of one entity
///
/// # Invariants
/// - `version` is strictly increasing across mutations
/// - `member_guids` is only populated for groups; each guid resolves to
///   an existing (possibly tombstoned) entity and never appears twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Internal storage id, assigned on first save
    pub id: u64,

    /// Stable external identity, generated at creation, never reused
    pub guid: String,

    /// Foreign-system primary key, unique per external system when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Individual or Group
    #[serde(rename = "type")]
    pub kind: EntityKind,

    /// Display name, derived from `data` when present
    pub name: String,

    /// Monotonically increasing mutation counter
    pub version: u64,

    /// Key-value payload
    pub data: Map<String, Value>,

    /// Timestamp of the most recent applied event
    pub last_updated: DateTime<Utc>,

    /// Soft-delete marker; preserved for audit and referential integrity
    #[serde(default)]
    pub deleted: bool,

    /// Ordered member guids (groups only)
    #[serde(rename = "memberIds", default, skip_serializing_if = "Vec::is_empty")]
    pub member_guids: Vec<String>,
}

impl Entity {
    /// Create a fresh entity at version 1 from a create event's payload
    ///
    /// The display name is derived from the payload's `name` field when
    /// present.
    pub fn new(
        guid: impl Into<String>,
        kind: EntityKind,
        data: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let external_id = data
            .get("externalId")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            id: 0,
            guid: guid.into(),
            external_id,
            kind,
            name,
            version: 1,
            data,
            last_updated: timestamp,
            deleted: false,
            member_guids: Vec::new(),
        }
    }

    /// Whether this entity is a group
    pub fn is_group(&self) -> bool {
        self.kind == EntityKind::Group
    }

    /// Shallow-merge a payload into `data`, refreshing the derived name
    pub fn merge_data(&mut self, payload: &Map<String, Value>) {
        for (key, value) in payload {
            self.data.insert(key.clone(), value.clone());
        }
        if let Some(name) = self.data.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(external_id) = self.data.get("externalId").and_then(Value::as_str) {
            self.external_id = Some(external_id.to_string());
        }
    }

    /// Record a mutation: bump the version and stamp the event time
    pub fn touch(&mut self, timestamp: DateTime<Utc>) {
        self.version += 1;
        self.last_updated = timestamp;
    }

    /// Append a member guid, rejecting duplicates
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] if this entity is not a group or the
    /// guid is already a member.
    pub fn add_member(&mut self, member_guid: &str) -> EngineResult<()> {
        if !self.is_group() {
            return Err(EngineError::Validation(format!(
                "entity {} is not a group",
                self.guid
            )));
        }
        if self.member_guids.iter().any(|g| g == member_guid) {
            return Err(EngineError::Validation(format!(
                "{} is already a member of {}",
                member_guid, self.guid
            )));
        }
        self.member_guids.push(member_guid.to_string());
        Ok(())
    }

    /// Remove a member guid
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] if this entity is not a group or the
    /// guid is not a member.
    pub fn remove_member(&mut self, member_guid: &str) -> EngineResult<()> {
        if !self.is_group() {
            return Err(EngineError::Validation(format!(
                "entity {} is not a group",
                self.guid
            )));
        }
        let before = self.member_guids.len();
        self.member_guids.retain(|g| g != member_guid);
        if self.member_guids.len() == before {
            return Err(EngineError::Validation(format!(
                "{} is not a member of {}",
                member_guid, self.guid
            )));
        }
        Ok(())
    }
}
