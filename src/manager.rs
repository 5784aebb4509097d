// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity Data Manager
//!
//! The façade the embedding host talks to. Owns the stores, the applier
//! service, the sync managers and the auth gate, and exposes the
//! engine's whole surface: submit, query, audit, sync, login, duplicate
//! inspection, lifecycle.
//!
//! The manager is constructed for exactly one tenant (every port it is
//! built from is already tenant-scoped) and no operation takes a
//! tenant id, so cross-tenant reads cannot be expressed.
//!
//! # Construction
//!
//! The host supplies everything through [`EntityDataManagerBuilder`]:
//! storage ports, the sync transport, auth provider configs, optionally
//! an external adapter and extra appliers. The engine reads no
//! environment variables.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::appliers::{ApplierRegistry, EventApplier};
use crate::auth::{AuthGate, AuthProviderConfig, Credentials};
use crate::domain::{
    AuditLogEntry, Entity, FormSubmission, PotentialDuplicate, SearchCriteria,
};
use crate::duplicates::DuplicateDetector;
use crate::entity_store::EntityStore;
use crate::errors::{EngineError, EngineResult};
use crate::event_store::EventStore;
use crate::merkle::MerkleHash;
use crate::service::EventApplierService;
use crate::storage::{AuthStoragePort, EntityStoragePort, EventStoragePort};
use crate::sync::{
    CancellationFlag, ExternalSyncAdapter, ExternalSyncManager, ExternalSyncReport,
    InternalSyncManager, SyncReport, SyncTransport,
};

/// Builder for [`EntityDataManager`]
pub struct EntityDataManagerBuilder {
    event_port: Arc<dyn EventStoragePort>,
    entity_port: Arc<dyn EntityStoragePort>,
    auth_port: Arc<dyn AuthStoragePort>,
    transport: Arc<dyn SyncTransport>,
    providers: Vec<AuthProviderConfig>,
    registry: ApplierRegistry,
    external_adapter: Option<Arc<dyn ExternalSyncAdapter>>,
    push_batch_size: Option<usize>,
}

impl EntityDataManagerBuilder {
    /// Start a builder from the required collaborators
    pub fn new(
        event_port: Arc<dyn EventStoragePort>,
        entity_port: Arc<dyn EntityStoragePort>,
        auth_port: Arc<dyn AuthStoragePort>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            event_port,
            entity_port,
            auth_port,
            transport,
            providers: vec![AuthProviderConfig::Default],
            registry: ApplierRegistry::with_builtins(),
            external_adapter: None,
            push_batch_size: None,
        }
    }

    /// Replace the provider list (order decides token precedence)
    pub fn with_auth_providers(mut self, providers: Vec<AuthProviderConfig>) -> Self {
        self.providers = providers;
        self
    }

    /// Register an extra applier before construction
    pub fn with_applier(mut self, tag: impl Into<String>, applier: Arc<dyn EventApplier>) -> Self {
        self.registry.register(tag, applier);
        self
    }

    /// Attach an external system adapter
    pub fn with_external_adapter(mut self, adapter: Arc<dyn ExternalSyncAdapter>) -> Self {
        self.external_adapter = Some(adapter);
        self
    }

    /// Override the push batch size
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = Some(size);
        self
    }

    /// Initialize the ports and wire the engine together
    pub async fn build(self) -> EngineResult<EntityDataManager> {
        self.event_port.initialize().await?;
        self.entity_port.initialize().await?;
        self.auth_port.initialize().await?;

        let event_store = Arc::new(EventStore::new(self.event_port.clone()));
        let entity_store = Arc::new(EntityStore::new(self.entity_port.clone()));
        let duplicates = Arc::new(DuplicateDetector::new(self.event_port.clone()));
        let service = Arc::new(EventApplierService::new(
            event_store,
            entity_store,
            self.registry,
            duplicates,
        ));

        let auth = Arc::new(AuthGate::new(
            self.providers,
            self.auth_port.clone(),
            self.transport.clone(),
        )?);

        let mut internal_sync =
            InternalSyncManager::new(service.clone(), self.transport, auth.clone());
        if let Some(size) = self.push_batch_size {
            internal_sync = internal_sync.with_push_batch_size(size);
        }

        let external_sync = self
            .external_adapter
            .map(|adapter| ExternalSyncManager::new(service.clone(), adapter));

        info!("entity data manager ready");
        Ok(EntityDataManager {
            service,
            internal_sync,
            external_sync,
            auth,
            event_port: self.event_port,
            entity_port: self.entity_port,
            auth_port: self.auth_port,
        })
    }
}

/// Façade over the event-sourced registry engine
pub struct EntityDataManager {
    service: Arc<EventApplierService>,
    internal_sync: InternalSyncManager,
    external_sync: Option<ExternalSyncManager>,
    auth: Arc<AuthGate>,
    event_port: Arc<dyn EventStoragePort>,
    entity_port: Arc<dyn EntityStoragePort>,
    auth_port: Arc<dyn AuthStoragePort>,
}

impl EntityDataManager {
    /// Submit one form through the applier pipeline
    ///
    /// Returns the entity matching the form's `entityGuid` after
    /// application; a resubmitted form guid returns the current entity
    /// unchanged.
    pub async fn submit_form(&self, form: FormSubmission) -> EngineResult<Option<Entity>> {
        self.service.submit_form(form).await
    }

    /// Load one entity by guid
    pub async fn get_entity(&self, guid: &str) -> EngineResult<Option<Entity>> {
        self.service.entity_store().get_by_guid(guid).await
    }

    /// All non-tombstoned entities
    pub async fn get_all_entities(&self) -> EngineResult<Vec<Entity>> {
        self.service.entity_store().get_all().await
    }

    /// Entities matching the criteria
    pub async fn search_entities(&self, criteria: &SearchCriteria) -> EngineResult<Vec<Entity>> {
        self.service.entity_store().search(criteria).await
    }

    /// All transitively reachable members of a group, depth-first
    pub async fn get_descendants(&self, group_guid: &str) -> EngineResult<Vec<Entity>> {
        self.service.get_descendants(group_guid).await
    }

    /// Audit trail of one entity, oldest first
    pub async fn get_audit_trail(&self, guid: &str) -> EngineResult<Vec<AuditLogEntry>> {
        self.service.event_store().get_audit_by_entity(guid).await
    }

    /// Whether any event is still below [`SyncLevel::Synced`](crate::domain::SyncLevel)
    pub async fn has_unsynced_events(&self) -> EngineResult<bool> {
        Ok(self.get_unsynced_events_count().await? > 0)
    }

    /// Number of events below [`SyncLevel::Synced`](crate::domain::SyncLevel)
    pub async fn get_unsynced_events_count(&self) -> EngineResult<usize> {
        self.service.event_store().count_unsynced_events().await
    }

    /// Push then pull against the central sync server
    pub async fn sync_with_sync_server(&self) -> EngineResult<SyncReport> {
        self.internal_sync.sync(&CancellationFlag::new()).await
    }

    /// Like [`Self::sync_with_sync_server`], cancellable between batches
    pub async fn sync_with_sync_server_cancellable(
        &self,
        cancel: &CancellationFlag,
    ) -> EngineResult<SyncReport> {
        self.internal_sync.sync(cancel).await
    }

    /// Number of entities the server holds for this tenant
    pub async fn count_remote_entities(&self) -> EngineResult<u64> {
        self.internal_sync.count_remote_entities().await
    }

    /// Run the external adapter sync
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] when no adapter was attached.
    pub async fn sync_with_external(&self, credentials: &Value) -> EngineResult<ExternalSyncReport> {
        match &self.external_sync {
            Some(manager) => manager.sync(credentials).await,
            None => Err(EngineError::Configuration(
                "no external adapter configured".into(),
            )),
        }
    }

    /// Log in through an auth provider
    pub async fn login(
        &self,
        credentials: Credentials,
        provider: Option<&str>,
    ) -> EngineResult<()> {
        self.auth.login(credentials, provider).await
    }

    /// Whether any provider holds a non-expired token
    pub async fn is_authenticated(&self) -> EngineResult<bool> {
        self.auth.is_authenticated().await
    }

    /// Clear every provider's token
    pub async fn logout(&self) -> EngineResult<()> {
        self.auth.logout().await
    }

    /// All recorded duplicate pairs
    pub async fn get_potential_duplicates(&self) -> EngineResult<Vec<PotentialDuplicate>> {
        self.service.duplicates().get_all().await
    }

    /// Recompute the Merkle root and compare with the stored one
    pub async fn verify_integrity(&self) -> EngineResult<MerkleHash> {
        self.service.event_store().verify_integrity().await
    }

    /// Register an applier for an event-type tag
    pub fn register_applier(&self, tag: impl Into<String>, applier: Arc<dyn EventApplier>) {
        self.service.register_applier(tag, applier);
    }

    /// The applier service, for advanced embedders
    pub fn service(&self) -> &Arc<EventApplierService> {
        &self.service
    }

    /// Close every port; the manager is unusable afterwards
    pub async fn close(&self) -> EngineResult<()> {
        self.event_port.close().await?;
        self.entity_port.close().await?;
        self.auth_port.close().await?;
        info!("entity data manager closed");
        Ok(())
    }
}
