// Copyright (c) 2025 - Cowboy AI, Inc.
//! Potential duplicate records
//!
//! After every `create-*` submission the entity store is probed for
//! candidates with the same normalized name; each candidate produces one
//! open [`PotentialDuplicate`]. Pairs are symmetric: recording `(a, b)`
//! and later `(b, a)` yields one record, not two. A `resolve-duplicate`
//! event closes a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolution state of a duplicate pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStatus {
    /// Recorded, awaiting a resolve-duplicate event
    Open,
    /// Closed by a resolve-duplicate event
    Resolved,
}

/// A recorded candidate duplicate pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialDuplicate {
    /// Guid of the newly created entity that triggered detection
    pub entity_guid: String,

    /// Guid of the pre-existing candidate
    pub duplicate_guid: String,

    /// Open or resolved
    pub status: DuplicateStatus,

    /// When the pair was recorded
    pub recorded_at: DateTime<Utc>,
}

impl PotentialDuplicate {
    /// Record a new open pair
    pub fn open(
        entity_guid: impl Into<String>,
        duplicate_guid: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_guid: entity_guid.into(),
            duplicate_guid: duplicate_guid.into(),
            status: DuplicateStatus::Open,
            recorded_at,
        }
    }

    /// Order-insensitive identity of the pair
    ///
    /// `(a, b)` and `(b, a)` map to the same key, which is how symmetric
    /// re-detection collapses to a single record.
    pub fn pair_key(&self) -> (String, String) {
        pair_key(&self.entity_guid, &self.duplicate_guid)
    }

    /// Whether this record covers the given unordered pair
    pub fn matches(&self, a: &str, b: &str) -> bool {
        self.pair_key() == pair_key(a, b)
    }
}

/// Normalized unordered key for a guid pair
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
