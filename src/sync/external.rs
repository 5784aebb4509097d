// Copyright (c) 2025 - Cowboy AI, Inc.
//! External sync manager
//!
//! Bidirectional translation between the engine and a foreign system of
//! record, through a pluggable adapter:
//!
//! ```text
//! F: engine events → foreign records    (push_data)
//! G: foreign records → FormSubmissions  (pull_data, syncLevel EXTERNAL)
//! ```
//!
//! The adapter owns schema translation and the foreign API calls; the
//! manager owns high-water marks, applier dispatch and per-item fault
//! isolation. A record that fails transformation is skipped with a
//! warning and never stops its siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{form::event_types, Entity, EntityKind, FormSubmission, SyncLevel};
use crate::entity_store::EntityStore;
use crate::errors::{EngineError, EngineResult};
use crate::event_store::EventStore;
use crate::service::EventApplierService;
use crate::storage::SyncMark;

use super::ExternalSyncReport;

/// What an adapter pushed, and how far the mark may advance
#[derive(Debug, Clone, Default)]
pub struct ExternalPushOutcome {
    /// Events successfully written to the foreign system
    pub pushed: usize,
    /// Max timestamp of the successfully pushed events; the push mark
    /// advances to exactly this
    pub max_timestamp: Option<DateTime<Utc>>,
}

/// Read access the adapter gets while translating
pub struct ExternalSyncContext<'a> {
    /// The local event log
    pub event_store: &'a EventStore,
    /// The local materialized entities
    pub entity_store: &'a EntityStore,
}

impl ExternalSyncContext<'_> {
    /// Map a foreign record onto a form submission
    ///
    /// A known `external_id` becomes an `update-*` for the mapped
    /// entity; an unknown one becomes a `create-*` under a guid the
    /// adapter supplies. Returned submissions carry
    /// [`SyncLevel::External`].
    pub async fn submission_for_record(
        &self,
        external_id: &str,
        new_guid: impl Into<String>,
        kind: EntityKind,
        data: Map<String, Value>,
        write_date: DateTime<Utc>,
        user_id: &str,
        form_guid: impl Into<String>,
    ) -> EngineResult<FormSubmission> {
        let existing = self.entity_store.get_by_external_id(external_id).await?;
        let (entity_guid, event_type) = match (&existing, kind) {
            (Some(entity), EntityKind::Individual) => {
                (entity.guid.clone(), event_types::UPDATE_INDIVIDUAL)
            }
            (Some(entity), EntityKind::Group) => (entity.guid.clone(), event_types::UPDATE_GROUP),
            (None, EntityKind::Individual) => (new_guid.into(), event_types::CREATE_INDIVIDUAL),
            (None, EntityKind::Group) => (new_guid.into(), event_types::CREATE_GROUP),
        };

        let mut data = data;
        data.insert("externalId".to_string(), Value::String(external_id.into()));

        Ok(FormSubmission {
            guid: form_guid.into(),
            entity_guid,
            event_type: event_type.to_string(),
            data,
            timestamp: write_date,
            user_id: user_id.to_string(),
            sync_level: SyncLevel::External,
        })
    }
}

/// Capability interface of an external system adapter
#[async_trait]
pub trait ExternalSyncAdapter: Send + Sync {
    /// Adapter name, for logs and reports
    fn name(&self) -> &str;

    /// Authenticate against the foreign system
    async fn authenticate(&self, credentials: &Value) -> EngineResult<()>;

    /// Translate and write local events since `since` to the foreign
    /// system
    async fn push_data(
        &self,
        since: DateTime<Utc>,
        ctx: &ExternalSyncContext<'_>,
    ) -> EngineResult<ExternalPushOutcome>;

    /// Fetch foreign records written since `since` as form submissions
    ///
    /// Returned submissions must carry [`SyncLevel::External`]; the
    /// manager applies them through the applier service. Records the
    /// adapter cannot identify or transform are its to skip (with a
    /// warning), not to fail on.
    async fn pull_data(
        &self,
        since: DateTime<Utc>,
        ctx: &ExternalSyncContext<'_>,
    ) -> EngineResult<Vec<FormSubmission>>;
}

/// Orchestrates one adapter against the engine
pub struct ExternalSyncManager {
    service: Arc<EventApplierService>,
    adapter: Arc<dyn ExternalSyncAdapter>,
}

impl ExternalSyncManager {
    /// Build a manager over one adapter
    pub fn new(service: Arc<EventApplierService>, adapter: Arc<dyn ExternalSyncAdapter>) -> Self {
        Self { service, adapter }
    }

    fn context(&self) -> ExternalSyncContext<'_> {
        ExternalSyncContext {
            event_store: self.service.event_store(),
            entity_store: self.service.entity_store(),
        }
    }

    /// Run one full external sync: authenticate, push, pull
    #[instrument(skip_all, fields(adapter = self.adapter.name()))]
    pub async fn sync(&self, credentials: &Value) -> EngineResult<ExternalSyncReport> {
        self.adapter.authenticate(credentials).await?;
        let mut report = self.push().await?;
        let pull = self.pull().await?;
        report.pulled = pull.pulled;
        report.skipped = pull.skipped;
        Ok(report)
    }

    /// Push local events through the adapter
    ///
    /// The push mark advances to the max timestamp of successfully
    /// pushed events only; a partial push leaves the remainder for the
    /// next run.
    pub async fn push(&self) -> EngineResult<ExternalSyncReport> {
        let event_store = self.service.event_store();
        let since = event_store
            .get_sync_mark(SyncMark::LastPushExternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let outcome = self.adapter.push_data(since, &self.context()).await?;
        if let Some(max_ts) = outcome.max_timestamp {
            event_store
                .advance_sync_mark(SyncMark::LastPushExternal, max_ts)
                .await?;
        }
        info!(pushed = outcome.pushed, "external push complete");
        Ok(ExternalSyncReport {
            pushed: outcome.pushed,
            ..ExternalSyncReport::default()
        })
    }

    /// Pull foreign records and apply them through the applier service
    ///
    /// Fault isolation is per item: a submission that fails validation
    /// or application is logged and skipped, its siblings continue. The
    /// pull mark advances to the max timestamp of the fetched records.
    pub async fn pull(&self) -> EngineResult<ExternalSyncReport> {
        let event_store = self.service.event_store();
        let since = event_store
            .get_sync_mark(SyncMark::LastPullExternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let submissions = self.adapter.pull_data(since, &self.context()).await?;

        let mut report = ExternalSyncReport::default();
        let mut max_ts: Option<DateTime<Utc>> = None;
        for submission in submissions {
            max_ts = Some(max_ts.map_or(submission.timestamp, |ts| ts.max(submission.timestamp)));

            if event_store.is_event_existed(&submission.guid).await? {
                debug!(guid = %submission.guid, "skipping already-present external event");
                continue;
            }
            let mut form = submission;
            form.sync_level = SyncLevel::External;
            match self.service.submit_form(form.clone()).await {
                Ok(_) => report.pulled += 1,
                Err(EngineError::Validation(reason) | EngineError::UnknownEventType(reason)) => {
                    warn!(guid = %form.guid, %reason, "skipping untransformable external record");
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(max_ts) = max_ts {
            event_store
                .advance_sync_mark(SyncMark::LastPullExternal, max_ts)
                .await?;
        }
        info!(pulled = report.pulled, skipped = report.skipped, "external pull complete");
        Ok(report)
    }

    /// Entities the adapter would push, for pre-sync inspection
    pub async fn pending_entities(&self) -> EngineResult<Vec<Entity>> {
        let since = self
            .service
            .event_store()
            .get_sync_mark(SyncMark::LastPushExternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.service.entity_store().get_modified_since(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliers::ApplierRegistry;
    use crate::domain::TenantId;
    use crate::duplicates::DuplicateDetector;
    use crate::storage::memory::{MemoryEntityStorage, MemoryEventStorage};
    use crate::storage::StorageLifecycle;
    use parking_lot::Mutex;
    use serde_json::json;

    async fn service() -> Arc<EventApplierService> {
        let event_port = Arc::new(MemoryEventStorage::new(TenantId::from("t1")));
        event_port.initialize().await.unwrap();
        let entity_port = Arc::new(MemoryEntityStorage::new(TenantId::from("t1")));
        entity_port.initialize().await.unwrap();
        Arc::new(EventApplierService::new(
            Arc::new(EventStore::new(event_port.clone())),
            Arc::new(EntityStore::new(entity_port)),
            ApplierRegistry::with_builtins(),
            Arc::new(DuplicateDetector::new(event_port)),
        ))
    }

    fn submission(guid: &str, entity_guid: &str, ts: &str, data: Value) -> FormSubmission {
        FormSubmission {
            guid: guid.to_string(),
            entity_guid: entity_guid.to_string(),
            event_type: event_types::CREATE_INDIVIDUAL.to_string(),
            data: data.as_object().unwrap().clone(),
            timestamp: ts.parse().unwrap(),
            user_id: "external".to_string(),
            sync_level: SyncLevel::External,
        }
    }

    struct StubAdapter {
        pulls: Mutex<Vec<Vec<FormSubmission>>>,
    }

    #[async_trait]
    impl ExternalSyncAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }

        async fn authenticate(&self, credentials: &Value) -> EngineResult<()> {
            if credentials.get("key").is_some() {
                Ok(())
            } else {
                Err(EngineError::Unauthorized("missing api key".into()))
            }
        }

        async fn push_data(
            &self,
            _since: DateTime<Utc>,
            _ctx: &ExternalSyncContext<'_>,
        ) -> EngineResult<ExternalPushOutcome> {
            Ok(ExternalPushOutcome::default())
        }

        async fn pull_data(
            &self,
            _since: DateTime<Utc>,
            _ctx: &ExternalSyncContext<'_>,
        ) -> EngineResult<Vec<FormSubmission>> {
            Ok(self.pulls.lock().pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_pull_applies_at_external_level() {
        let service = service().await;
        let adapter = Arc::new(StubAdapter {
            pulls: Mutex::new(vec![vec![submission(
                "x1",
                "E1",
                "2026-01-19T12:00:00Z",
                json!({"name": "Maria", "externalId": "odoo-7"}),
            )]]),
        });
        let manager = ExternalSyncManager::new(service.clone(), adapter);

        let report = manager.sync(&json!({"key": "k"})).await.unwrap();
        assert_eq!(report.pulled, 1);

        let entity = service
            .entity_store()
            .get_by_guid("E1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.name, "Maria");

        let events = service.event_store().get_all_events().await.unwrap();
        assert_eq!(events[0].sync_level, SyncLevel::External);
        assert_eq!(
            service
                .event_store()
                .get_sync_mark(SyncMark::LastPullExternal)
                .await
                .unwrap(),
            Some("2026-01-19T12:00:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_faulty_record_does_not_stop_siblings() {
        let service = service().await;
        let mut bad = submission("x2", "E2", "2026-01-19T12:01:00Z", json!({"name": "x"}));
        bad.event_type = "no-such-type".to_string();
        let good = submission(
            "x3",
            "E3",
            "2026-01-19T12:02:00Z",
            json!({"name": "Ana", "externalId": "odoo-9"}),
        );
        let adapter = Arc::new(StubAdapter {
            pulls: Mutex::new(vec![vec![bad, good]]),
        });
        let manager = ExternalSyncManager::new(service.clone(), adapter);

        let report = manager.sync(&json!({"key": "k"})).await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.skipped, 1);
        assert!(service
            .entity_store()
            .get_by_guid("E3")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_authentication_aborts() {
        let service = service().await;
        let adapter = Arc::new(StubAdapter {
            pulls: Mutex::new(vec![]),
        });
        let manager = ExternalSyncManager::new(service, adapter);
        assert!(matches!(
            manager.sync(&json!({})).await,
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_known_external_id_maps_to_update() {
        let service = service().await;
        // Seed an entity carrying an external id.
        service
            .submit_form(submission(
                "seed",
                "E1",
                "2026-01-19T11:00:00Z",
                json!({"name": "Maria", "externalId": "odoo-7"}),
            ))
            .await
            .unwrap();

        let manager = ExternalSyncManager::new(
            service.clone(),
            Arc::new(StubAdapter {
                pulls: Mutex::new(vec![]),
            }),
        );
        let ctx = manager.context();
        let mapped = ctx
            .submission_for_record(
                "odoo-7",
                "unused-guid",
                EntityKind::Individual,
                json!({"name": "Maria Silva"}).as_object().unwrap().clone(),
                "2026-01-19T12:00:00Z".parse().unwrap(),
                "external",
                "x9",
            )
            .await
            .unwrap();

        assert_eq!(mapped.event_type, event_types::UPDATE_INDIVIDUAL);
        assert_eq!(mapped.entity_guid, "E1");
        assert_eq!(mapped.sync_level, SyncLevel::External);
    }
}
