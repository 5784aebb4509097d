// Copyright (c) 2025 - Cowboy AI, Inc.
//! Engine-level properties: replay determinism, version monotonicity,
//! Merkle agreement and pagination disjointness over arbitrary inputs

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

use registry_engine::domain::form::event_types;
use registry_engine::{
    ApplierRegistry, DuplicateDetector, EntityStore, EventApplierService, EventCursor,
    EventStore, FormSubmission, MemoryEntityStorage, MemoryEventStorage, StorageLifecycle,
    SyncLevel, TenantId,
};

use super::{create_batch, payload};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

async fn service() -> EventApplierService {
    let event_port = Arc::new(MemoryEventStorage::new(TenantId::from("prop")));
    event_port.initialize().await.unwrap();
    let entity_port = Arc::new(MemoryEntityStorage::new(TenantId::from("prop")));
    entity_port.initialize().await.unwrap();
    EventApplierService::new(
        Arc::new(EventStore::new(event_port.clone())),
        Arc::new(EntityStore::new(entity_port)),
        ApplierRegistry::with_builtins(),
        Arc::new(DuplicateDetector::new(event_port)),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Replaying the recorded log on a fresh store reproduces entity
    /// state exactly.
    #[test]
    fn prop_replay_reproduces_state(forms in create_batch(16)) {
        runtime().block_on(async {
            let live = service().await;
            for form in &forms {
                live.submit_form(form.clone()).await.unwrap();
            }
            let log = live.event_store().get_all_events().await.unwrap();

            let replayed = service().await;
            for event in log {
                replayed.submit_form(event).await.unwrap();
            }

            let mut a = live.entity_store().get_all().await.unwrap();
            let mut b = replayed.entity_store().get_all().await.unwrap();
            a.sort_by(|x, y| x.guid.cmp(&y.guid));
            b.sort_by(|x, y| x.guid.cmp(&y.guid));
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.guid, y.guid);
                assert_eq!(x.version, y.version);
                assert_eq!(x.data, y.data);
                assert_eq!(x.deleted, y.deleted);
            }
        });
    }

    /// Versions increase strictly with every update, and the stored
    /// Merkle root always matches a recomputation from the log.
    #[test]
    fn prop_versions_strictly_increase(updates in proptest::collection::vec(payload(), 1..12)) {
        runtime().block_on(async {
            let service = service().await;
            service
                .submit_form(FormSubmission {
                    guid: "create".to_string(),
                    entity_guid: "P1".to_string(),
                    event_type: event_types::CREATE_INDIVIDUAL.to_string(),
                    data: json!({"name": "Base"}).as_object().unwrap().clone(),
                    timestamp: "2026-01-19T08:00:00Z".parse().unwrap(),
                    user_id: "prop".to_string(),
                    sync_level: SyncLevel::Local,
                })
                .await
                .unwrap();

            let mut last_version = 1;
            for (i, data) in updates.into_iter().enumerate() {
                let updated = service
                    .submit_form(FormSubmission {
                        guid: format!("update-{:02}", i),
                        entity_guid: "P1".to_string(),
                        event_type: event_types::UPDATE_INDIVIDUAL.to_string(),
                        data,
                        timestamp: format!("2026-01-19T09:{:02}:00Z", i).parse().unwrap(),
                        user_id: "prop".to_string(),
                        sync_level: SyncLevel::Local,
                    })
                    .await
                    .unwrap()
                    .unwrap();
                assert!(updated.version > last_version);
                last_version = updated.version;
            }

            service.event_store().verify_integrity().await.unwrap();
        });
    }

    /// Cursor pagination partitions the log: pages are disjoint, cover
    /// everything at or after `since`, and iterate in strictly
    /// increasing `(timestamp, guid)` order.
    #[test]
    fn prop_pagination_partitions_the_log(
        forms in create_batch(40),
        page_size in 1usize..12,
    ) {
        runtime().block_on(async {
            let service = service().await;
            for form in &forms {
                service.submit_form(form.clone()).await.unwrap();
            }
            let store = service.event_store();
            let since = "2026-01-19T00:00:00Z".parse().unwrap();

            let mut cursor: Option<EventCursor> = None;
            let mut seen = Vec::new();
            loop {
                let page = store
                    .get_events_since_paginated(since, cursor.as_ref(), page_size)
                    .await
                    .unwrap();
                if page.events.is_empty() {
                    break;
                }
                seen.extend(page.events.iter().map(|e| (e.timestamp, e.guid.clone())));
                cursor = page.next_cursor;
                if !page.has_more {
                    break;
                }
            }

            assert_eq!(seen.len(), forms.len());
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
        });
    }

    /// Submitting the same form any number of times leaves exactly one
    /// event and one audit entry.
    #[test]
    fn prop_resubmission_idempotent(data in payload(), repeats in 2usize..6) {
        runtime().block_on(async {
            let service = service().await;
            let form = FormSubmission {
                guid: "repeat".to_string(),
                entity_guid: "P1".to_string(),
                event_type: event_types::CREATE_INDIVIDUAL.to_string(),
                data,
                timestamp: "2026-01-19T08:00:00Z".parse().unwrap(),
                user_id: "prop".to_string(),
                sync_level: SyncLevel::Local,
            };

            for _ in 0..repeats {
                service.submit_form(form.clone()).await.unwrap();
            }

            assert_eq!(service.event_store().get_all_events().await.unwrap().len(), 1);
            assert_eq!(service.event_store().get_audit_all().await.unwrap().len(), 1);
            let entity = service.entity_store().get_by_guid("P1").await.unwrap().unwrap();
            assert_eq!(entity.version, 1);
        });
    }
}
