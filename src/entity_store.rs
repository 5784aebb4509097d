// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity Store
//!
//! Wraps an [`EntityStoragePort`] with the query semantics the engine
//! promises: default queries exclude tombstoned entities, search filters
//! combine conjunctively within a group and disjunctively across groups,
//! and external-id lookup returns at most one entity (the port keeps a
//! unique index on it).

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{Entity, SearchCriteria};
use crate::errors::EngineResult;
use crate::storage::EntityStoragePort;

/// Materialized entity state keyed by entity identity
pub struct EntityStore {
    port: Arc<dyn EntityStoragePort>,
}

impl EntityStore {
    /// Wrap a storage port
    pub fn new(port: Arc<dyn EntityStoragePort>) -> Self {
        Self { port }
    }

    /// Access to the underlying port for lifecycle calls
    pub fn port(&self) -> &Arc<dyn EntityStoragePort> {
        &self.port
    }

    /// Persist an entity, returning the stored copy with its assigned id
    pub async fn save(&self, entity: &Entity) -> EngineResult<Entity> {
        self.port.save(entity).await
    }

    /// Load one entity by guid, tombstoned or not
    pub async fn get_by_guid(&self, guid: &str) -> EngineResult<Option<Entity>> {
        self.port.get_by_guid(guid).await
    }

    /// Load one entity by its foreign-system id
    ///
    /// Used by external pull to map incoming records onto existing
    /// entities instead of creating duplicates.
    pub async fn get_by_external_id(&self, external_id: &str) -> EngineResult<Option<Entity>> {
        self.port.get_by_external_id(external_id).await
    }

    /// Entities matching the criteria, sorted `last_updated DESC`,
    /// paginated by the criteria's offset and limit
    pub async fn search(&self, criteria: &SearchCriteria) -> EngineResult<Vec<Entity>> {
        self.port.search(criteria).await
    }

    /// All non-tombstoned entities
    pub async fn get_all(&self) -> EngineResult<Vec<Entity>> {
        self.port.get_all().await
    }

    /// Hard-delete one entity record
    pub async fn delete(&self, guid: &str) -> EngineResult<()> {
        self.port.delete(guid).await
    }

    /// Entities touched since `since`, tombstoned included
    pub async fn get_modified_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<Entity>> {
        self.port.get_modified_since(since).await
    }

    /// Drop all entity records for this tenant
    pub async fn clear(&self) -> EngineResult<()> {
        self.port.clear().await
    }
}
