// Copyright (c) 2025 - Cowboy AI, Inc.
//! Internal sync manager
//!
//! At-least-once, resumable push/pull against the central sync server.
//! Push runs first, then pull; both are auth-gated and cancellable
//! between batches.
//!
//! ```text
//! push: LOCAL events after lastPushInternal ──batches──> server
//!         ack ⇒ level → SYNCED, mark ← batch max timestamp
//!         conflict ⇒ surfaced, mark frozen
//!
//! pull: server events after lastPullInternal ──pages──> applier service
//!         known guid ⇒ skipped, applied at SYNCED
//!         duplicate marker ⇒ returns, mark frozen
//! ```
//!
//! Applied events are never rolled back; marks advance only after
//! confirmed durability, so a crash between apply and ack is repaired
//! by re-pulling.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::AuthGate;
use crate::domain::SyncLevel;
use crate::errors::EngineResult;
use crate::service::EventApplierService;
use crate::storage::SyncMark;

use super::{BackoffPolicy, CancellationFlag, SyncReport, SyncTransport, DEFAULT_PUSH_BATCH_SIZE};

/// Push/pull orchestration against the central server
pub struct InternalSyncManager {
    service: Arc<EventApplierService>,
    transport: Arc<dyn SyncTransport>,
    auth: Arc<AuthGate>,
    backoff: BackoffPolicy,
    push_batch_size: usize,
}

impl InternalSyncManager {
    /// Build a manager with the default batch size and backoff
    pub fn new(
        service: Arc<EventApplierService>,
        transport: Arc<dyn SyncTransport>,
        auth: Arc<AuthGate>,
    ) -> Self {
        Self {
            service,
            transport,
            auth,
            backoff: BackoffPolicy::default(),
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
        }
    }

    /// Override the push batch size
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Override the retry policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run one full sync: push, then pull, then the audit trail
    #[instrument(skip_all)]
    pub async fn sync(&self, cancel: &CancellationFlag) -> EngineResult<SyncReport> {
        let mut report = self.push(cancel).await?;
        if cancel.is_cancelled() {
            return Ok(report);
        }
        let pull = self.pull(cancel).await?;
        report.pulled = pull.pulled;
        report.pull_blocked = pull.pull_blocked;
        if cancel.is_cancelled() {
            return Ok(report);
        }
        self.sync_audit_logs().await?;
        Ok(report)
    }

    /// Push local events the server has not acknowledged
    ///
    /// Selects events strictly after `lastPushInternal` that are still
    /// at [`SyncLevel::Local`], in the stable iteration order. Each
    /// acknowledged batch upgrades its events to `SYNCED` and advances
    /// the mark to the batch's max timestamp. A conflict response is
    /// surfaced and freezes the mark until resolved.
    pub async fn push(&self, cancel: &CancellationFlag) -> EngineResult<SyncReport> {
        let token = self.auth.active_token().await?;
        let event_store = self.service.event_store();
        let since = event_store.get_sync_mark(SyncMark::LastPushInternal).await?;

        let candidates: Vec<_> = event_store
            .get_all_events()
            .await?
            .into_iter()
            .filter(|e| e.sync_level == SyncLevel::Local)
            .filter(|e| since.map_or(true, |mark| e.timestamp > mark))
            .collect();

        let mut report = SyncReport::default();
        for batch in candidates.chunks(self.push_batch_size) {
            if cancel.is_cancelled() {
                info!("push cancelled between batches");
                return Ok(report);
            }

            let response = self
                .backoff
                .retry(|| self.transport.push_events(batch, &token))
                .await?;

            if !response.is_success() {
                warn!(conflicts = response.conflicts.len(), "server reported push conflicts");
                report.conflicts = response.conflicts;
                return Ok(report);
            }

            for event in batch {
                event_store
                    .update_sync_level(&event.guid, SyncLevel::Synced)
                    .await?;
            }
            if let Some(max_ts) = batch.iter().map(|e| e.timestamp).max() {
                event_store
                    .advance_sync_mark(SyncMark::LastPushInternal, max_ts)
                    .await?;
            }
            report.pushed += batch.len();
            debug!(batch = batch.len(), total = report.pushed, "push batch acknowledged");
        }
        Ok(report)
    }

    /// Pull remote events and apply them through the applier service
    ///
    /// Already-present events are skipped; fresh ones are applied at
    /// [`SyncLevel::Synced`]. The mark advances to the wall clock only
    /// after the final page; the server's duplicate marker returns
    /// without advancing it.
    pub async fn pull(&self, cancel: &CancellationFlag) -> EngineResult<SyncReport> {
        let token = self.auth.active_token().await?;
        let event_store = self.service.event_store();
        let since = event_store
            .get_sync_mark(SyncMark::LastPullInternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let mut report = SyncReport::default();
        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                info!("pull cancelled between pages, mark not advanced");
                return Ok(report);
            }

            let response = self
                .backoff
                .retry(|| self.transport.pull_events(since, cursor.as_deref(), &token))
                .await?;

            if let Some(error) = response.error {
                warn!(%error, "server refused pull, mark not advanced");
                report.pull_blocked = Some(error);
                return Ok(report);
            }

            for event in response.events {
                if event_store.is_event_existed(&event.guid).await? {
                    debug!(guid = %event.guid, "skipping already-present event");
                    continue;
                }
                let mut form = event;
                form.sync_level = SyncLevel::Synced;
                self.service.submit_form(form).await?;
                report.pulled += 1;
            }

            cursor = response.next_cursor;
            if !response.has_more {
                break;
            }
        }

        event_store
            .advance_sync_mark(SyncMark::LastPullInternal, Utc::now())
            .await?;
        info!(pulled = report.pulled, "pull complete");
        Ok(report)
    }

    /// Exchange audit trails with the server
    ///
    /// Pushes local entries newer than the push mark and appends remote
    /// entries whose guid is not yet present.
    pub async fn sync_audit_logs(&self) -> EngineResult<()> {
        let token = self.auth.active_token().await?;
        let event_store = self.service.event_store();

        let push_since = event_store
            .get_sync_mark(SyncMark::LastPushInternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let outgoing = event_store.get_audit_since(push_since).await?;
        if !outgoing.is_empty() {
            self.backoff
                .retry(|| self.transport.push_audit_logs(&outgoing, &token))
                .await?;
        }

        let pull_since = event_store
            .get_sync_mark(SyncMark::LastPullInternal)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let incoming = self
            .backoff
            .retry(|| self.transport.pull_audit_logs(pull_since, &token))
            .await?;
        if !incoming.is_empty() {
            let known: std::collections::HashSet<String> = event_store
                .get_audit_all()
                .await?
                .into_iter()
                .map(|entry| entry.guid)
                .collect();
            let fresh: Vec<_> = incoming
                .into_iter()
                .filter(|entry| !known.contains(&entry.guid))
                .collect();
            if !fresh.is_empty() {
                event_store.save_audit(&fresh).await?;
            }
        }
        Ok(())
    }

    /// Number of entities the server holds for this tenant
    pub async fn count_remote_entities(&self) -> EngineResult<u64> {
        let token = self.auth.active_token().await?;
        self.backoff
            .retry(|| self.transport.count_entities(&token))
            .await
    }
}
