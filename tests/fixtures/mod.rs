// Copyright (c) 2025 - Cowboy AI, Inc.
//! Shared test fixtures: an in-memory engine and a scriptable mock sync
//! server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use registry_engine::sync::{LoginResponse, PullResponse, PushResponse};
use registry_engine::{
    AuditLogEntry, EngineError, EngineResult, EntityDataManager, EntityDataManagerBuilder,
    EventCursor, FormSubmission, MemoryAuthStorage, MemoryEntityStorage, MemoryEventStorage,
    SyncLevel, SyncTransport, TenantId,
};

pub const TEST_PASSWORD: &str = "secret";
pub const TEST_TOKEN: &str = "token-1";

/// Scriptable server state behind the mock transport
#[derive(Default)]
pub struct ServerState {
    /// Events the server holds, iterated in `(timestamp, guid)` order
    pub events: Vec<FormSubmission>,
    /// Page size of pull responses
    pub page_size: usize,
    /// When set, every pull returns this error marker
    pub pull_error: Option<String>,
    /// When set, the next push returns these conflicts
    pub push_conflicts: Option<Vec<Value>>,
    /// When set, every authenticated call returns 401
    pub revoke_tokens: bool,
    /// Batch sizes the server saw on push
    pub push_batches: Vec<usize>,
}

/// In-process implementation of the sync transport
pub struct MockTransport {
    pub state: Mutex<ServerState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                page_size: 10,
                ..ServerState::default()
            }),
        })
    }

    fn check_token(&self, token: &str) -> EngineResult<()> {
        if self.state.lock().revoke_tokens || token != TEST_TOKEN {
            Err(EngineError::Unauthorized("token rejected".into()))
        } else {
            Ok(())
        }
    }

    fn sorted_events(&self) -> Vec<FormSubmission> {
        let mut events = self.state.lock().events.clone();
        events.sort_by(|a, b| (a.timestamp, &a.guid).cmp(&(b.timestamp, &b.guid)));
        events
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn pull_events(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        token: &str,
    ) -> EngineResult<PullResponse> {
        self.check_token(token)?;
        if let Some(error) = self.state.lock().pull_error.clone() {
            return Ok(PullResponse {
                events: Vec::new(),
                next_cursor: None,
                has_more: false,
                error: Some(error),
            });
        }

        let after = match cursor {
            Some(cursor) => Some(cursor.parse::<EventCursor>()?),
            None => None,
        };
        let page_size = self.state.lock().page_size;
        let page: Vec<FormSubmission> = self
            .sorted_events()
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .filter(|e| match &after {
                Some(cursor) => cursor.precedes(e.timestamp, &e.guid),
                None => true,
            })
            .take(page_size)
            .collect();

        let has_more = page.len() == page_size;
        let next_cursor = page
            .last()
            .map(|e| EventCursor::new(e.timestamp, e.guid.clone()).to_string());
        Ok(PullResponse {
            events: page,
            next_cursor,
            has_more,
            error: None,
        })
    }

    async fn push_events(
        &self,
        events: &[FormSubmission],
        token: &str,
    ) -> EngineResult<PushResponse> {
        self.check_token(token)?;
        let mut state = self.state.lock();
        state.push_batches.push(events.len());
        if let Some(conflicts) = state.push_conflicts.clone() {
            return Ok(PushResponse {
                status: "conflict".to_string(),
                conflicts,
            });
        }
        for event in events {
            if !state.events.iter().any(|e| e.guid == event.guid) {
                let mut stored = event.clone();
                stored.sync_level = SyncLevel::Synced;
                state.events.push(stored);
            }
        }
        Ok(PushResponse {
            status: "success".to_string(),
            conflicts: Vec::new(),
        })
    }

    async fn pull_audit_logs(
        &self,
        _since: DateTime<Utc>,
        token: &str,
    ) -> EngineResult<Vec<AuditLogEntry>> {
        self.check_token(token)?;
        Ok(Vec::new())
    }

    async fn push_audit_logs(&self, _entries: &[AuditLogEntry], token: &str) -> EngineResult<()> {
        self.check_token(token)
    }

    async fn count_entities(&self, token: &str) -> EngineResult<u64> {
        self.check_token(token)?;
        Ok(self.state.lock().events.len() as u64)
    }

    async fn login(&self, email: &str, password: &str) -> EngineResult<LoginResponse> {
        if password == TEST_PASSWORD {
            Ok(LoginResponse {
                token: TEST_TOKEN.to_string(),
                user_id: format!("user-{}", email),
            })
        } else {
            Err(EngineError::Unauthorized("wrong password".into()))
        }
    }
}

/// An engine over fresh in-memory ports and the given transport
pub async fn manager_with(transport: Arc<MockTransport>) -> EntityDataManager {
    let tenant = TenantId::from("tenant-test");
    EntityDataManagerBuilder::new(
        Arc::new(MemoryEventStorage::new(tenant.clone())),
        Arc::new(MemoryEntityStorage::new(tenant.clone())),
        Arc::new(MemoryAuthStorage::new(tenant)),
        transport,
    )
    .build()
    .await
    .expect("engine should build over memory ports")
}

/// An engine whose transport nobody scripts
pub async fn manager() -> EntityDataManager {
    manager_with(MockTransport::new()).await
}

/// A form submission fixture
pub fn form(
    guid: &str,
    event_type: &str,
    entity_guid: &str,
    data: Value,
    minute: u32,
) -> FormSubmission {
    FormSubmission {
        guid: guid.to_string(),
        entity_guid: entity_guid.to_string(),
        event_type: event_type.to_string(),
        data: data.as_object().expect("fixture data must be an object").clone(),
        timestamp: timestamp(minute),
        user_id: "enumerator-1".to_string(),
        sync_level: SyncLevel::Local,
    }
}

/// A deterministic timestamp `minute` minutes past noon
pub fn timestamp(minute: u32) -> DateTime<Utc> {
    format!("2026-01-19T12:{:02}:00Z", minute % 60)
        .parse()
        .unwrap()
}
