// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Applier Service
//!
//! The submission pipeline. Coordinates validation, idempotency, applier
//! dispatch and the compound write:
//!
//! ```text
//! submit_form
//!   1. validate the form
//!   2. known form guid → return current entity unchanged
//!   3. load current entity, prefetch referenced entities
//!   4. dispatch to the applier for the form's type (pure, synchronous)
//!   5. compound write under the per-tenant write guard:
//!      event append + audit entries + merkle root, then entity saves
//!   6. return the modified entity matching the form's entityGuid
//! ```
//!
//! # Transaction Semantics
//!
//! The event log is the source of truth. The event, its audit entries
//! and the new Merkle root land in one atomic port write; entity saves
//! follow under the same write guard. A crash between the two leaves a
//! log that replay repairs, never a log that lies.
//!
//! # Suspension discipline
//!
//! Storage calls suspend; applier evaluation never does. Every entity an
//! applier might need is prefetched before it runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::appliers::{ApplierRegistry, EventApplier, PrefetchedEntities};
use crate::domain::{AuditLogEntry, Entity, FormSubmission};
use crate::duplicates::DuplicateDetector;
use crate::entity_store::EntityStore;
use crate::errors::{EngineError, EngineResult};
use crate::event_store::EventStore;

/// Validates, applies and persists form submissions
pub struct EventApplierService {
    event_store: Arc<EventStore>,
    entity_store: Arc<EntityStore>,
    registry: parking_lot::RwLock<ApplierRegistry>,
    duplicates: Arc<DuplicateDetector>,
    /// Per-tenant single-writer guard over the compound write
    write_guard: Mutex<()>,
}

impl EventApplierService {
    /// Build the service over its collaborators
    pub fn new(
        event_store: Arc<EventStore>,
        entity_store: Arc<EntityStore>,
        registry: ApplierRegistry,
        duplicates: Arc<DuplicateDetector>,
    ) -> Self {
        Self {
            event_store,
            entity_store,
            registry: parking_lot::RwLock::new(registry),
            duplicates,
            write_guard: Mutex::new(()),
        }
    }

    /// Register an applier for an event-type tag
    ///
    /// A second registration for the same tag replaces the prior one.
    pub fn register_applier(&self, tag: impl Into<String>, applier: Arc<dyn EventApplier>) {
        self.registry.write().register(tag, applier);
    }

    /// Submit one form through the pipeline
    ///
    /// Returns the entity matching the form's `entityGuid` after the
    /// event is applied, or the unchanged current entity for an
    /// idempotent resubmission.
    #[instrument(skip_all, fields(form = %form.guid, event_type = %form.event_type))]
    pub async fn submit_form(&self, form: FormSubmission) -> EngineResult<Option<Entity>> {
        form.validate()?;

        if self.event_store.is_event_existed(&form.guid).await? {
            debug!("form already applied, returning current entity");
            return self.entity_store.get_by_guid(&form.entity_guid).await;
        }

        let applier = self
            .registry
            .read()
            .get(&form.event_type)
            .ok_or_else(|| EngineError::UnknownEventType(form.event_type.clone()))?;

        // Prefetch everything the applier may touch; it must not
        // suspend once invoked.
        let current = self.entity_store.get_by_guid(&form.entity_guid).await?;
        let lookup = self.prefetch(&form).await?;

        let result = applier.apply(current.as_ref(), &form, &lookup)?;

        let guard = self.write_guard.lock().await;
        let outcome = self.commit(&form, result).await;
        drop(guard);
        outcome
    }

    /// Persist one applied result: event + audit + root, then entities
    async fn commit(
        &self,
        form: &FormSubmission,
        result: crate::appliers::AppliedResult,
    ) -> EngineResult<Option<Entity>> {
        let audit_entries: Vec<AuditLogEntry> = result
            .changes
            .iter()
            .map(|change| AuditLogEntry {
                guid: Uuid::new_v4().to_string(),
                event_guid: form.guid.clone(),
                entity_guid: change.modified.guid.clone(),
                action: form.event_type.clone(),
                user_id: form.user_id.clone(),
                timestamp: form.timestamp,
                changes: change.changes.clone(),
                sync_level: form.sync_level,
            })
            .collect();

        let appended = self
            .event_store
            .save_events(std::slice::from_ref(form), &audit_entries)
            .await?;
        if appended.is_empty() {
            // Lost the race against an identical resubmission.
            return self.entity_store.get_by_guid(&form.entity_guid).await;
        }

        let mut target = None;
        for change in &result.changes {
            let stored = self.entity_store.save(&change.modified).await?;
            if stored.guid == form.entity_guid {
                target = Some(stored);
            }
        }

        if form.event_type.starts_with("create-") {
            for change in result.changes.iter().filter(|c| c.existing.is_none()) {
                self.duplicates
                    .record_candidates(&change.modified, &self.entity_store)
                    .await?;
            }
        }
        if !result.resolved_pairs.is_empty() {
            self.duplicates
                .resolve_pairs(&result.resolved_pairs, form.timestamp)
                .await?;
        }

        match target {
            Some(entity) => Ok(Some(entity)),
            None => {
                warn!(entity = %form.entity_guid, "applier produced no change for the target entity");
                self.entity_store.get_by_guid(&form.entity_guid).await
            }
        }
    }

    /// Prefetch the entities an applier may reference
    ///
    /// Walks the payload for guid-bearing keys (`guid`, `memberId`,
    /// `entityGuid`, `duplicateGuid`) at any depth and resolves each
    /// through the entity store.
    async fn prefetch(&self, form: &FormSubmission) -> EngineResult<PrefetchedEntities> {
        let mut guids = Vec::new();
        collect_referenced_guids(&serde_json::Value::Object(form.data.clone()), &mut guids);

        let mut entities = HashMap::new();
        for guid in guids {
            if let Some(entity) = self.entity_store.get_by_guid(&guid).await? {
                entities.insert(guid, entity);
            }
        }
        Ok(PrefetchedEntities::new(entities))
    }

    /// All transitively reachable members of a group, depth-first
    ///
    /// Cycle-safe via a visited set; tombstoned entities are excluded
    /// from member views.
    pub async fn get_descendants(&self, group_guid: &str) -> EngineResult<Vec<Entity>> {
        let root = self
            .entity_store
            .get_by_guid(group_guid)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("entity {} does not exist", group_guid))
            })?;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.guid.clone());
        let mut stack: Vec<String> = root.member_guids.iter().rev().cloned().collect();
        let mut descendants = Vec::new();

        while let Some(guid) = stack.pop() {
            if !visited.insert(guid.clone()) {
                continue;
            }
            let Some(entity) = self.entity_store.get_by_guid(&guid).await? else {
                warn!(%guid, "group member does not resolve");
                continue;
            };
            if entity.deleted {
                continue;
            }
            for child in entity.member_guids.iter().rev() {
                stack.push(child.clone());
            }
            descendants.push(entity);
        }
        Ok(descendants)
    }

    /// The event store this service appends to
    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    /// The entity store this service materializes into
    pub fn entity_store(&self) -> &Arc<EntityStore> {
        &self.entity_store
    }

    /// The duplicate detector fed by create submissions
    pub fn duplicates(&self) -> &Arc<DuplicateDetector> {
        &self.duplicates
    }
}

/// Collect guid-bearing string values from a payload, depth-first
fn collect_referenced_guids(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                match (key.as_str(), value.as_str()) {
                    ("guid" | "memberId" | "entityGuid" | "duplicateGuid", Some(guid))
                        if !guid.is_empty() =>
                    {
                        out.push(guid.to_string());
                    }
                    _ => collect_referenced_guids(value, out),
                }
            }
        }
        serde_json::Value::Array(values) => {
            for value in values {
                collect_referenced_guids(value, out);
            }
        }
        _ => {}
    }
}
