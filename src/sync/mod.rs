// Copyright (c) 2025 - Cowboy AI, Inc.
//! Synchronization
//!
//! Two independent sync paths share the event log:
//!
//! - [`internal`] - push/pull against the central sync server over the
//!   frozen JSON protocol
//! - [`external`] - bidirectional translation to a foreign system of
//!   record through a pluggable adapter
//!
//! Each path keeps its own pair of high-water marks and its own
//! duplicate detection; neither ever rolls back applied events. Marks
//! advance only after confirmed durability, so a crash between apply
//! and ack is repaired by re-pulling (the event is detected as already
//! present and skipped).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{AuditLogEntry, FormSubmission};

pub mod backoff;
pub mod client;
pub mod external;
pub mod internal;

pub use backoff::BackoffPolicy;
pub use client::{SyncServerClient, SyncTransport};
pub use external::{
    ExternalPushOutcome, ExternalSyncAdapter, ExternalSyncContext, ExternalSyncManager,
};
pub use internal::InternalSyncManager;

/// Default number of events per push batch
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;

/// Response of `GET /sync/pull`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Events in the stable iteration order
    #[serde(default)]
    pub events: Vec<FormSubmission>,
    /// Cursor to resume strictly after the last event
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Whether a further page may exist
    #[serde(default)]
    pub has_more: bool,
    /// Error marker; set (with an empty event list) while the tenant
    /// has unresolved duplicates on the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /sync/push`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub events: Vec<FormSubmission>,
    pub config_id: String,
}

/// Response of `POST /sync/push`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// `"success"` or `"conflict"`
    pub status: String,
    /// Conflict descriptors when status is `"conflict"`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Value>,
}

impl PushResponse {
    /// Whether the server acknowledged the batch
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Body of `POST /sync/push/audit-logs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPushRequest {
    pub audit_logs: Vec<AuditLogEntry>,
    pub config_id: String,
}

/// Response of `GET /sync/count-entities`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Body of `POST /users/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response of `POST /users/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
}

/// Outcome of one full internal sync (push, then pull)
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Events acknowledged by the server
    pub pushed: usize,
    /// Events applied from the server
    pub pulled: usize,
    /// Conflicts the server reported; these block the push mark
    pub conflicts: Vec<Value>,
    /// Why the pull did not advance, when the server refused it
    pub pull_blocked: Option<String>,
}

/// Outcome of one external sync
#[derive(Debug, Clone, Default)]
pub struct ExternalSyncReport {
    /// Events the adapter pushed to the foreign system
    pub pushed: usize,
    /// Records applied from the foreign system
    pub pulled: usize,
    /// Records skipped (missing identifier or failed transformation)
    pub skipped: usize,
}

/// Cooperative cancellation for sync loops
///
/// Cancellation is honored between batches; a batch already in flight
/// runs to its response or timeout, and no water mark advances for a
/// partially acknowledged batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// A fresh, uncancelled flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_pull_response_duplicate_marker_decodes() {
        let body = r#"{"events": [], "nextCursor": null, "error": "Duplicates exist for this tenant"}"#;
        let response: PullResponse = serde_json::from_str(body).unwrap();
        assert!(response.events.is_empty());
        assert!(response.error.is_some());
        assert!(!response.has_more);
    }

    #[test]
    fn test_push_response_status() {
        let ok: PushResponse = serde_json::from_str(r#"{"status": "success"}"#).unwrap();
        assert!(ok.is_success());
        let conflict: PushResponse =
            serde_json::from_str(r#"{"status": "conflict", "conflicts": [{"guid": "e1"}]}"#)
                .unwrap();
        assert!(!conflict.is_success());
        assert_eq!(conflict.conflicts.len(), 1);
    }
}
