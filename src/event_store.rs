// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Store
//!
//! Wraps an [`EventStoragePort`] and maintains the invariants of the
//! append-only log:
//!
//! 1. **Append-only**: events are never updated or deleted
//! 2. **Idempotent**: a resubmission with a known form guid is silently
//!    dropped
//! 3. **Ordered**: reads iterate in `(timestamp ASC, guid ASC)`
//! 4. **Tamper-evident**: the Merkle root over the whole log is
//!    recomputed and persisted atomically with every append
//! 5. **Monotonic sync levels**: an event's level never regresses
//!
//! ```text
//! Submission → EventStore::save_events → port.append_events_atomic
//!                                   (events + audit + merkle root)
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{AuditLogEntry, EventCursor, FormSubmission, SyncLevel};
use crate::errors::{EngineError, EngineResult};
use crate::merkle::{self, MerkleHash};
use crate::storage::{EventStoragePort, SyncMark};

/// Default page size for paginated reads
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// One page of events plus the cursor to resume after it
#[derive(Debug, Clone)]
pub struct EventPage {
    /// Events in the stable iteration order
    pub events: Vec<FormSubmission>,
    /// Position of the last emitted event; `None` for an empty page
    pub next_cursor: Option<EventCursor>,
    /// Whether a further page may exist
    pub has_more: bool,
}

/// Append-only event log with audit trail and Merkle fingerprint
pub struct EventStore {
    port: Arc<dyn EventStoragePort>,
}

impl EventStore {
    /// Wrap a storage port
    pub fn new(port: Arc<dyn EventStoragePort>) -> Self {
        Self { port }
    }

    /// Access to the underlying port for lifecycle calls
    pub fn port(&self) -> &Arc<dyn EventStoragePort> {
        &self.port
    }

    /// Append a batch of events with their audit entries
    ///
    /// Events whose guid is already present are silently dropped; the
    /// remainder is appended atomically together with the audit entries
    /// and the recomputed Merkle root. Returns the internal ids assigned
    /// to the appended events.
    pub async fn save_events(
        &self,
        events: &[FormSubmission],
        audit_entries: &[AuditLogEntry],
    ) -> EngineResult<Vec<u64>> {
        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            if self.port.is_event_existed(&event.guid).await? {
                debug!(guid = %event.guid, "dropping resubmitted event");
            } else {
                fresh.push(event.clone());
            }
        }
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        // Root covers the whole log including the new batch.
        let mut log = self.port.get_all_events().await?;
        log.extend(fresh.iter().cloned());
        log.sort_by(|a, b| (a.timestamp, &a.guid).cmp(&(b.timestamp, &b.guid)));
        let root = merkle::root_from_events(&log)?;

        let ids = self
            .port
            .append_events_atomic(&fresh, audit_entries, root)
            .await?;
        debug!(appended = fresh.len(), root = %root, "events appended");
        Ok(ids)
    }

    /// All events in the stable iteration order
    pub async fn get_all_events(&self) -> EngineResult<Vec<FormSubmission>> {
        self.port.get_all_events().await
    }

    /// Events with `timestamp >= since`
    pub async fn get_events_since(
        &self,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<FormSubmission>> {
        self.port.get_events_since(since).await
    }

    /// One page of events with `timestamp >= since`
    ///
    /// Passing the returned cursor to the next call resumes strictly
    /// after the last emitted event, so pages never overlap.
    pub async fn get_events_since_paginated(
        &self,
        since: DateTime<Utc>,
        after: Option<&EventCursor>,
        page_size: usize,
    ) -> EngineResult<EventPage> {
        let size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        let events = self.port.get_events_page(since, after, size).await?;
        let next_cursor = events
            .last()
            .map(|e| EventCursor::new(e.timestamp, e.guid.clone()));
        let has_more = events.len() == size;
        Ok(EventPage {
            events,
            next_cursor,
            has_more,
        })
    }

    /// Whether an event with this form guid exists
    pub async fn is_event_existed(&self, form_guid: &str) -> EngineResult<bool> {
        self.port.is_event_existed(form_guid).await
    }

    /// Upgrade the sync level of one event
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] on a downgrade request.
    pub async fn update_sync_level(
        &self,
        form_guid: &str,
        level: SyncLevel,
    ) -> EngineResult<()> {
        let current = self
            .port
            .get_event(form_guid)
            .await?
            .ok_or_else(|| EngineError::Storage(format!("unknown event {}", form_guid)))?
            .sync_level;
        if !current.can_upgrade_to(level) {
            return Err(EngineError::InvalidTransition {
                from: current.as_u8(),
                to: level.as_u8(),
            });
        }
        self.port.update_sync_level(form_guid, level).await
    }

    /// Events not yet acknowledged by the central server
    pub async fn get_unsynced_events(&self) -> EngineResult<Vec<FormSubmission>> {
        Ok(self
            .port
            .get_all_events()
            .await?
            .into_iter()
            .filter(|e| e.sync_level < SyncLevel::Synced)
            .collect())
    }

    /// Number of events below [`SyncLevel::Synced`]
    pub async fn count_unsynced_events(&self) -> EngineResult<usize> {
        Ok(self.get_unsynced_events().await?.len())
    }

    /// Full audit log in `timestamp ASC` order
    pub async fn get_audit_all(&self) -> EngineResult<Vec<AuditLogEntry>> {
        self.port.get_audit_all().await
    }

    /// Audit entries with `timestamp >= since`
    pub async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<AuditLogEntry>> {
        self.port.get_audit_since(since).await
    }

    /// Audit trail of one entity
    pub async fn get_audit_by_entity(
        &self,
        entity_guid: &str,
    ) -> EngineResult<Vec<AuditLogEntry>> {
        self.port.get_audit_by_entity(entity_guid).await
    }

    /// Append audit entries outside of an event append (pull-applied
    /// audit sync)
    pub async fn save_audit(&self, entries: &[AuditLogEntry]) -> EngineResult<()> {
        self.port.save_audit(entries).await
    }

    /// The persisted Merkle root, or the empty-log root for a fresh
    /// store
    pub async fn get_merkle_root(&self) -> EngineResult<MerkleHash> {
        Ok(self
            .port
            .get_merkle_root()
            .await?
            .unwrap_or_else(merkle::empty_root))
    }

    /// Recompute the root from the stored log and compare with the
    /// persisted root
    ///
    /// # Errors
    ///
    /// [`EngineError::Integrity`] when the roots disagree, which means
    /// the log or the root was modified outside the engine.
    pub async fn verify_integrity(&self) -> EngineResult<MerkleHash> {
        let stored = self.get_merkle_root().await?;
        let recomputed = merkle::root_from_events(&self.port.get_all_events().await?)?;
        if stored != recomputed {
            warn!(stored = %stored, recomputed = %recomputed, "merkle root mismatch");
            return Err(EngineError::Integrity(format!(
                "stored root {} does not match recomputed root {}",
                stored, recomputed
            )));
        }
        Ok(stored)
    }

    /// Read one sync high-water mark
    pub async fn get_sync_mark(&self, mark: SyncMark) -> EngineResult<Option<DateTime<Utc>>> {
        self.port.get_sync_mark(mark).await
    }

    /// Advance one sync high-water mark
    ///
    /// Marks are monotonic non-decreasing; a request older than the
    /// current mark is ignored.
    pub async fn advance_sync_mark(
        &self,
        mark: SyncMark,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        match self.port.get_sync_mark(mark).await? {
            Some(current) if current >= at => Ok(()),
            _ => self.port.set_sync_mark(mark, at).await,
        }
    }

    /// Drop everything for this tenant
    pub async fn clear(&self) -> EngineResult<()> {
        self.port.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{form::event_types, TenantId};
    use crate::storage::memory::MemoryEventStorage;
    use crate::storage::StorageLifecycle;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store() -> EventStore {
        let port = Arc::new(MemoryEventStorage::new(TenantId::from("t1")));
        port.initialize().await.unwrap();
        EventStore::new(port)
    }

    fn event(guid: &str, ts: &str) -> FormSubmission {
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), json!("John"));
        FormSubmission {
            guid: guid.to_string(),
            entity_guid: format!("entity-{}", guid),
            event_type: event_types::CREATE_INDIVIDUAL.to_string(),
            data,
            timestamp: ts.parse().unwrap(),
            user_id: "u1".to_string(),
            sync_level: SyncLevel::Local,
        }
    }

    #[tokio::test]
    async fn test_resubmission_is_silently_dropped() {
        let store = store().await;
        let e = event("e1", "2026-01-19T12:00:00Z");

        let first = store.save_events(&[e.clone()], &[]).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = store.save_events(&[e], &[]).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.get_all_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_root_tracks_the_log() {
        let store = store().await;
        store
            .save_events(&[event("a", "2026-01-19T12:00:00Z")], &[])
            .await
            .unwrap();
        let after_one = store.get_merkle_root().await.unwrap();

        store
            .save_events(&[event("b", "2026-01-19T12:01:00Z")], &[])
            .await
            .unwrap();
        let after_two = store.get_merkle_root().await.unwrap();

        assert_ne!(after_one, after_two);
        store.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_level_downgrade_rejected() {
        let store = store().await;
        store
            .save_events(&[event("a", "2026-01-19T12:00:00Z")], &[])
            .await
            .unwrap();

        store
            .update_sync_level("a", SyncLevel::Synced)
            .await
            .unwrap();
        let err = store
            .update_sync_level("a", SyncLevel::Local)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { from: 1, to: 0 }
        ));
    }

    #[tokio::test]
    async fn test_pagination_is_disjoint_and_ordered() {
        let store = store().await;
        let events: Vec<FormSubmission> = (0..25)
            .map(|i| {
                event(
                    &format!("e{:02}", i),
                    &format!("2026-01-19T12:{:02}:00Z", i),
                )
            })
            .collect();
        store.save_events(&events, &[]).await.unwrap();

        let since = "2026-01-19T00:00:00Z".parse().unwrap();
        let mut seen = Vec::new();
        let mut cursor = None;
        let mut sizes = Vec::new();
        loop {
            let page = store
                .get_events_since_paginated(since, cursor.as_ref(), 10)
                .await
                .unwrap();
            if page.events.is_empty() {
                break;
            }
            sizes.push(page.events.len());
            seen.extend(page.events.iter().map(|e| e.guid.clone()));
            cursor = page.next_cursor;
            if !page.has_more {
                break;
            }
        }

        assert_eq!(sizes, vec![10, 10, 5]);
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(seen.len(), 25);
        assert_eq!(deduped.len(), 25);
    }

    #[tokio::test]
    async fn test_sync_mark_never_regresses() {
        let store = store().await;
        let newer: DateTime<Utc> = "2026-01-19T12:00:00Z".parse().unwrap();
        let older: DateTime<Utc> = "2026-01-19T11:00:00Z".parse().unwrap();

        store
            .advance_sync_mark(SyncMark::LastPushInternal, newer)
            .await
            .unwrap();
        store
            .advance_sync_mark(SyncMark::LastPushInternal, older)
            .await
            .unwrap();

        assert_eq!(
            store
                .get_sync_mark(SyncMark::LastPushInternal)
                .await
                .unwrap(),
            Some(newer)
        );
    }

    #[tokio::test]
    async fn test_unsynced_count() {
        let store = store().await;
        store
            .save_events(
                &[
                    event("a", "2026-01-19T12:00:00Z"),
                    event("b", "2026-01-19T12:01:00Z"),
                ],
                &[],
            )
            .await
            .unwrap();
        assert_eq!(store.count_unsynced_events().await.unwrap(), 2);

        store
            .update_sync_level("a", SyncLevel::Synced)
            .await
            .unwrap();
        assert_eq!(store.count_unsynced_events().await.unwrap(), 1);
    }
}
