// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event appliers
//!
//! An applier is a pure function from `(current entity, form, lookup)`
//! to the set of modified entities plus their change diffs. Appliers
//! never perform I/O, never read the clock and never draw randomness;
//! every entity they might need is prefetched by the service and handed
//! in through [`EntityLookup`]. Replaying the ordered event log through
//! the appliers on an empty store reproduces entity state exactly.
//!
//! ```text
//! FormSubmission ──registry──> EventApplier::apply ──> AppliedResult
//!                                                   (entities + diffs)
//! ```
//!
//! # Registry
//!
//! The [`ApplierRegistry`] maps event-type tags to appliers. It is
//! seeded with the built-in set and accepts user registrations; a
//! duplicate registration for a tag replaces the prior applier.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Entity, FieldChange, FormSubmission};
use crate::errors::EngineResult;

pub mod builtin;

pub use builtin::register_builtins;

/// Read-only access to prefetched entities
///
/// The service resolves every guid an applier might touch before
/// invoking it, so `get` is synchronous and side-effect free.
pub trait EntityLookup {
    /// The prefetched entity for a guid, if it exists
    fn get(&self, guid: &str) -> Option<Entity>;
}

/// Prefetched entities keyed by guid
#[derive(Debug, Default)]
pub struct PrefetchedEntities {
    entities: HashMap<String, Entity>,
}

impl PrefetchedEntities {
    /// Build a lookup over prefetched entities
    pub fn new(entities: HashMap<String, Entity>) -> Self {
        Self { entities }
    }
}

impl EntityLookup for PrefetchedEntities {
    fn get(&self, guid: &str) -> Option<Entity> {
        self.entities.get(guid).cloned()
    }
}

/// One modified entity with its before-state and change diff
#[derive(Debug, Clone)]
pub struct AppliedChange {
    /// State before the event, `None` for a creation
    pub existing: Option<Entity>,
    /// State after the event, version already bumped
    pub modified: Entity,
    /// Structured diff between the two
    pub changes: Vec<FieldChange>,
}

/// Everything one applied event produced
///
/// Multiple changes occur when a single event touches several entities,
/// e.g. `add-member` writes both the new member and the updated group.
#[derive(Debug, Clone, Default)]
pub struct AppliedResult {
    /// Modified entities in write order
    pub changes: Vec<AppliedChange>,
    /// Duplicate pairs this event resolved (resolve-duplicate only)
    pub resolved_pairs: Vec<(String, String)>,
}

impl AppliedResult {
    /// Result with a single modified entity
    pub fn single(existing: Option<Entity>, modified: Entity, changes: Vec<FieldChange>) -> Self {
        Self {
            changes: vec![AppliedChange {
                existing,
                modified,
                changes,
            }],
            resolved_pairs: Vec::new(),
        }
    }
}

/// Capability interface of an applier
///
/// Implementations must be pure: same `(entity, form, lookup)` always
/// produces the same result.
pub trait EventApplier: Send + Sync {
    /// Apply one form to the current entity state
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult>;
}

/// Adapter so plain functions register as appliers
pub struct FnApplier<F>(pub F);

impl<F> EventApplier for FnApplier<F>
where
    F: Fn(Option<&Entity>, &FormSubmission, &dyn EntityLookup) -> EngineResult<AppliedResult>
        + Send
        + Sync,
{
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        (self.0)(entity, form, lookup)
    }
}

/// Mapping from event-type tag to applier
pub struct ApplierRegistry {
    appliers: HashMap<String, Arc<dyn EventApplier>>,
}

impl ApplierRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// A registry seeded with the built-in appliers
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        register_builtins(&mut registry);
        registry
    }

    /// Register an applier for a tag, replacing any prior registration
    pub fn register(&mut self, tag: impl Into<String>, applier: Arc<dyn EventApplier>) {
        let tag = tag.into();
        if self.appliers.insert(tag.clone(), applier).is_some() {
            debug!(%tag, "replaced applier registration");
        }
    }

    /// The applier registered for a tag
    pub fn get(&self, tag: &str) -> Option<Arc<dyn EventApplier>> {
        self.appliers.get(tag).cloned()
    }

    /// All registered tags
    pub fn tags(&self) -> Vec<&str> {
        self.appliers.keys().map(String::as_str).collect()
    }
}

impl Default for ApplierRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::form::event_types;

    #[test]
    fn test_builtins_are_seeded() {
        let registry = ApplierRegistry::with_builtins();
        for tag in [
            event_types::CREATE_INDIVIDUAL,
            event_types::CREATE_GROUP,
            event_types::UPDATE_INDIVIDUAL,
            event_types::UPDATE_GROUP,
            event_types::ADD_MEMBER,
            event_types::REMOVE_MEMBER,
            event_types::DELETE_ENTITY,
            event_types::RESOLVE_DUPLICATE,
        ] {
            assert!(registry.get(tag).is_some(), "missing builtin {}", tag);
        }
    }

    fn noop(
        _entity: Option<&Entity>,
        _form: &FormSubmission,
        _lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        Ok(AppliedResult::default())
    }

    #[test]
    fn test_registration_replaces_prior() {
        let mut registry = ApplierRegistry::with_builtins();
        registry.register(event_types::DELETE_ENTITY, Arc::new(FnApplier(noop)));

        let applier = registry.get(event_types::DELETE_ENTITY).unwrap();
        let form = FormSubmission {
            guid: "f".into(),
            entity_guid: "e".into(),
            event_type: event_types::DELETE_ENTITY.into(),
            data: serde_json::Map::new(),
            timestamp: chrono::Utc::now(),
            user_id: "u".into(),
            sync_level: crate::domain::SyncLevel::Local,
        };
        let result = applier
            .apply(None, &form, &PrefetchedEntities::default())
            .unwrap();
        assert!(result.changes.is_empty());
    }
}
