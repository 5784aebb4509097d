// Copyright (c) 2025 - Cowboy AI, Inc.
//! Duplicate detection and resolution bookkeeping
//!
//! After every `create-*` submission the store is probed for entities
//! whose normalized name matches the just-created one; each hit is
//! recorded as an open [`PotentialDuplicate`]. Records are keyed by the
//! unordered guid pair, so re-detection in either order collapses onto
//! the existing record. A `resolve-duplicate` event closes records.
//!
//! Unresolved duplicates block the server's pull response for the
//! tenant; the client may still push.

use std::sync::Arc;
use tracing::debug;

use crate::domain::{duplicate::pair_key, DuplicateStatus, Entity, PotentialDuplicate};
use crate::entity_store::EntityStore;
use crate::errors::EngineResult;
use crate::storage::EventStoragePort;

/// Normalize a display name for candidate matching
///
/// Lowercased, trimmed, inner whitespace collapsed to single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Records and resolves candidate duplicate pairs
pub struct DuplicateDetector {
    port: Arc<dyn EventStoragePort>,
}

impl DuplicateDetector {
    /// Wrap the event storage port that owns the duplicate records
    pub fn new(port: Arc<dyn EventStoragePort>) -> Self {
        Self { port }
    }

    /// Probe for candidates matching a just-created entity
    ///
    /// Candidates are non-tombstoned entities other than the created
    /// one whose normalized name matches. Each previously unseen pair
    /// is recorded open.
    pub async fn record_candidates(
        &self,
        created: &Entity,
        entity_store: &EntityStore,
    ) -> EngineResult<Vec<PotentialDuplicate>> {
        let needle = normalize_name(&created.name);
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let existing_pairs = self.port.get_potential_duplicates().await?;
        let mut recorded = Vec::new();
        for candidate in entity_store.get_all().await? {
            if candidate.guid == created.guid || normalize_name(&candidate.name) != needle {
                continue;
            }
            let key = pair_key(&created.guid, &candidate.guid);
            if existing_pairs.iter().any(|p| p.pair_key() == key)
                || recorded
                    .iter()
                    .any(|p: &PotentialDuplicate| p.pair_key() == key)
            {
                continue;
            }
            let pair =
                PotentialDuplicate::open(&created.guid, &candidate.guid, created.last_updated);
            debug!(entity = %pair.entity_guid, duplicate = %pair.duplicate_guid, "recorded potential duplicate");
            self.port.save_potential_duplicate(&pair).await?;
            recorded.push(pair);
        }
        Ok(recorded)
    }

    /// Close the records for resolved pairs
    ///
    /// A pair that was never recorded is stored directly as resolved,
    /// so the audit of the resolution is preserved either way.
    pub async fn resolve_pairs(
        &self,
        pairs: &[(String, String)],
        resolved_at: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<()> {
        let existing = self.port.get_potential_duplicates().await?;
        for (entity_guid, duplicate_guid) in pairs {
            let key = pair_key(entity_guid, duplicate_guid);
            match existing.iter().find(|p| p.pair_key() == key) {
                Some(record) => {
                    let mut resolved = record.clone();
                    resolved.status = DuplicateStatus::Resolved;
                    self.port.update_potential_duplicate(&resolved).await?;
                }
                None => {
                    let mut record =
                        PotentialDuplicate::open(entity_guid, duplicate_guid, resolved_at);
                    record.status = DuplicateStatus::Resolved;
                    self.port.save_potential_duplicate(&record).await?;
                }
            }
        }
        Ok(())
    }

    /// All recorded pairs
    pub async fn get_all(&self) -> EngineResult<Vec<PotentialDuplicate>> {
        self.port.get_potential_duplicates().await
    }

    /// Open pairs only
    pub async fn get_open(&self) -> EngineResult<Vec<PotentialDuplicate>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|p| p.status == DuplicateStatus::Open)
            .collect())
    }

    /// Whether any pair is still open
    pub async fn has_open(&self) -> EngineResult<bool> {
        Ok(!self.get_open().await?.is_empty())
    }
}
