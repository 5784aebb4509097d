// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory storage ports
//!
//! Reference implementations of every storage port, backed by maps under
//! a [`parking_lot`] lock. Used by the test suites and by embedders that
//! want an ephemeral engine. Locks are never held across an await, so
//! the async port methods cannot deadlock the executor.
//!
//! Atomicity is trivially satisfied here: each compound write mutates
//! the tables under one lock acquisition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{
    AuditLogEntry, Entity, EventCursor, FormSubmission, PotentialDuplicate, SearchCriteria,
    SyncLevel, TenantId,
};
use crate::errors::{EngineError, EngineResult};
use crate::merkle::MerkleHash;

use super::{
    AppConfigStoragePort, AuthStoragePort, EntityStoragePort, EventStoragePort, SessionRecord,
    SessionStoragePort, StorageLifecycle, StoredToken, SyncMark, UserRecord, UserStoragePort,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Created,
    Ready,
    Closed,
}

fn guard(state: &RwLock<PortState>) -> EngineResult<()> {
    match *state.read() {
        PortState::Ready => Ok(()),
        PortState::Created => Err(EngineError::Storage("port not initialized".into())),
        PortState::Closed => Err(EngineError::Storage("port closed".into())),
    }
}

// ---------------------------------------------------------------------
// Event storage
// ---------------------------------------------------------------------

#[derive(Default)]
struct EventTables {
    /// Events in append order; reads sort by `(timestamp, guid)`
    events: Vec<FormSubmission>,
    /// Form guid → index into `events`
    by_guid: HashMap<String, usize>,
    next_id: u64,
    audit: Vec<AuditLogEntry>,
    merkle_root: Option<MerkleHash>,
    marks: HashMap<SyncMark, DateTime<Utc>>,
    duplicates: Vec<PotentialDuplicate>,
}

/// In-memory [`EventStoragePort`]
pub struct MemoryEventStorage {
    tenant: TenantId,
    state: RwLock<PortState>,
    tables: RwLock<EventTables>,
}

impl MemoryEventStorage {
    /// Create an event storage scoped to one tenant
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            state: RwLock::new(PortState::Created),
            tables: RwLock::new(EventTables::default()),
        }
    }

    fn sorted_events(tables: &EventTables) -> Vec<FormSubmission> {
        let mut events = tables.events.clone();
        events.sort_by(|a, b| (a.timestamp, &a.guid).cmp(&(b.timestamp, &b.guid)));
        events
    }
}

#[async_trait]
impl StorageLifecycle for MemoryEventStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        debug!(tenant = %self.tenant, "event storage initialized");
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl EventStoragePort for MemoryEventStorage {
    async fn append_events_atomic(
        &self,
        events: &[FormSubmission],
        audit_entries: &[AuditLogEntry],
        merkle_root: MerkleHash,
    ) -> EngineResult<Vec<u64>> {
        guard(&self.state)?;
        let mut tables = self.tables.write();

        // Reject the whole batch before mutating anything; the single
        // lock acquisition makes the compound write atomic.
        for event in events {
            if tables.by_guid.contains_key(&event.guid) {
                return Err(EngineError::Conflict(format!(
                    "duplicate event guid {}",
                    event.guid
                )));
            }
        }

        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let index = tables.events.len();
            tables.by_guid.insert(event.guid.clone(), index);
            tables.events.push(event.clone());
            tables.next_id += 1;
            ids.push(tables.next_id);
        }
        tables.audit.extend_from_slice(audit_entries);
        tables.merkle_root = Some(merkle_root);
        Ok(ids)
    }

    async fn get_all_events(&self) -> EngineResult<Vec<FormSubmission>> {
        guard(&self.state)?;
        Ok(Self::sorted_events(&self.tables.read()))
    }

    async fn get_events_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<FormSubmission>> {
        guard(&self.state)?;
        Ok(Self::sorted_events(&self.tables.read())
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .collect())
    }

    async fn get_events_page(
        &self,
        since: DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> EngineResult<Vec<FormSubmission>> {
        guard(&self.state)?;
        Ok(Self::sorted_events(&self.tables.read())
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .filter(|e| match after {
                Some(cursor) => cursor.precedes(e.timestamp, &e.guid),
                None => true,
            })
            .take(limit)
            .collect())
    }

    async fn is_event_existed(&self, form_guid: &str) -> EngineResult<bool> {
        guard(&self.state)?;
        Ok(self.tables.read().by_guid.contains_key(form_guid))
    }

    async fn get_event(&self, form_guid: &str) -> EngineResult<Option<FormSubmission>> {
        guard(&self.state)?;
        let tables = self.tables.read();
        Ok(tables
            .by_guid
            .get(form_guid)
            .map(|&index| tables.events[index].clone()))
    }

    async fn update_sync_level(&self, form_guid: &str, level: SyncLevel) -> EngineResult<()> {
        guard(&self.state)?;
        let mut tables = self.tables.write();
        let index = *tables
            .by_guid
            .get(form_guid)
            .ok_or_else(|| EngineError::Storage(format!("unknown event {}", form_guid)))?;
        tables.events[index].sync_level = level;
        Ok(())
    }

    async fn save_audit(&self, entries: &[AuditLogEntry]) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().audit.extend_from_slice(entries);
        Ok(())
    }

    async fn get_audit_all(&self) -> EngineResult<Vec<AuditLogEntry>> {
        guard(&self.state)?;
        let mut entries = self.tables.read().audit.clone();
        entries.sort_by(|a, b| (a.timestamp, &a.guid).cmp(&(b.timestamp, &b.guid)));
        Ok(entries)
    }

    async fn get_audit_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<AuditLogEntry>> {
        Ok(self
            .get_audit_all()
            .await?
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .collect())
    }

    async fn get_audit_by_entity(&self, entity_guid: &str) -> EngineResult<Vec<AuditLogEntry>> {
        Ok(self
            .get_audit_all()
            .await?
            .into_iter()
            .filter(|e| e.entity_guid == entity_guid)
            .collect())
    }

    async fn save_merkle_root(&self, root: MerkleHash) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().merkle_root = Some(root);
        Ok(())
    }

    async fn get_merkle_root(&self) -> EngineResult<Option<MerkleHash>> {
        guard(&self.state)?;
        Ok(self.tables.read().merkle_root)
    }

    async fn get_sync_mark(&self, mark: SyncMark) -> EngineResult<Option<DateTime<Utc>>> {
        guard(&self.state)?;
        Ok(self.tables.read().marks.get(&mark).copied())
    }

    async fn set_sync_mark(&self, mark: SyncMark, at: DateTime<Utc>) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().marks.insert(mark, at);
        Ok(())
    }

    async fn save_potential_duplicate(&self, pair: &PotentialDuplicate) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().duplicates.push(pair.clone());
        Ok(())
    }

    async fn get_potential_duplicates(&self) -> EngineResult<Vec<PotentialDuplicate>> {
        guard(&self.state)?;
        Ok(self.tables.read().duplicates.clone())
    }

    async fn update_potential_duplicate(&self, pair: &PotentialDuplicate) -> EngineResult<()> {
        guard(&self.state)?;
        let mut tables = self.tables.write();
        let key = pair.pair_key();
        match tables.duplicates.iter_mut().find(|d| d.pair_key() == key) {
            Some(existing) => {
                *existing = pair.clone();
                Ok(())
            }
            None => Err(EngineError::Storage(format!(
                "no duplicate record for ({}, {})",
                pair.entity_guid, pair.duplicate_guid
            ))),
        }
    }

    async fn clear(&self) -> EngineResult<()> {
        guard(&self.state)?;
        *self.tables.write() = EventTables::default();
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Entity storage
// ---------------------------------------------------------------------

#[derive(Default)]
struct EntityTables {
    by_guid: HashMap<String, Entity>,
    /// external_id → guid, unique where set
    by_external: HashMap<String, String>,
    next_id: u64,
}

/// In-memory [`EntityStoragePort`]
pub struct MemoryEntityStorage {
    tenant: TenantId,
    state: RwLock<PortState>,
    tables: RwLock<EntityTables>,
}

impl MemoryEntityStorage {
    /// Create an entity storage scoped to one tenant
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            state: RwLock::new(PortState::Created),
            tables: RwLock::new(EntityTables::default()),
        }
    }
}

#[async_trait]
impl StorageLifecycle for MemoryEntityStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        debug!(tenant = %self.tenant, "entity storage initialized");
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl EntityStoragePort for MemoryEntityStorage {
    async fn save(&self, entity: &Entity) -> EngineResult<Entity> {
        guard(&self.state)?;
        let mut tables = self.tables.write();

        let mut stored = entity.clone();
        if stored.id == 0 {
            tables.next_id += 1;
            stored.id = tables.next_id;
        }

        if let Some(external_id) = &stored.external_id {
            if let Some(owner) = tables.by_external.get(external_id) {
                if owner != &stored.guid {
                    return Err(EngineError::Conflict(format!(
                        "external id {} already mapped to {}",
                        external_id, owner
                    )));
                }
            }
            tables
                .by_external
                .insert(external_id.clone(), stored.guid.clone());
        }

        tables.by_guid.insert(stored.guid.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_by_guid(&self, guid: &str) -> EngineResult<Option<Entity>> {
        guard(&self.state)?;
        Ok(self.tables.read().by_guid.get(guid).cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> EngineResult<Option<Entity>> {
        guard(&self.state)?;
        let tables = self.tables.read();
        Ok(tables
            .by_external
            .get(external_id)
            .and_then(|guid| tables.by_guid.get(guid))
            .cloned())
    }

    async fn search(&self, criteria: &SearchCriteria) -> EngineResult<Vec<Entity>> {
        guard(&self.state)?;
        let tables = self.tables.read();
        let mut matches: Vec<Entity> = tables
            .by_guid
            .values()
            .filter(|e| !e.deleted)
            .filter(|e| criteria.matches(e))
            .cloned()
            .collect();
        // last_updated DESC, guid as the stable tie-breaker
        matches.sort_by(|a, b| {
            (b.last_updated, &a.guid)
                .partial_cmp(&(a.last_updated, &b.guid))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches
            .into_iter()
            .skip(criteria.offset)
            .take(criteria.effective_limit())
            .collect())
    }

    async fn get_all(&self) -> EngineResult<Vec<Entity>> {
        guard(&self.state)?;
        let mut entities: Vec<Entity> = self
            .tables
            .read()
            .by_guid
            .values()
            .filter(|e| !e.deleted)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(entities)
    }

    async fn delete(&self, guid: &str) -> EngineResult<()> {
        guard(&self.state)?;
        let mut tables = self.tables.write();
        if let Some(entity) = tables.by_guid.remove(guid) {
            if let Some(external_id) = entity.external_id {
                tables.by_external.remove(&external_id);
            }
        }
        Ok(())
    }

    async fn get_modified_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<Entity>> {
        guard(&self.state)?;
        let mut entities: Vec<Entity> = self
            .tables
            .read()
            .by_guid
            .values()
            .filter(|e| e.last_updated >= since)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(entities)
    }

    async fn clear(&self) -> EngineResult<()> {
        guard(&self.state)?;
        *self.tables.write() = EntityTables::default();
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Auth storage
// ---------------------------------------------------------------------

#[derive(Default)]
struct AuthTables {
    tokens: HashMap<String, StoredToken>,
    username: Option<String>,
}

/// In-memory [`AuthStoragePort`]
pub struct MemoryAuthStorage {
    state: RwLock<PortState>,
    tables: RwLock<AuthTables>,
}

impl MemoryAuthStorage {
    /// Create an auth storage
    pub fn new(_tenant: TenantId) -> Self {
        Self {
            state: RwLock::new(PortState::Created),
            tables: RwLock::new(AuthTables::default()),
        }
    }
}

#[async_trait]
impl StorageLifecycle for MemoryAuthStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl AuthStoragePort for MemoryAuthStorage {
    async fn get_token(&self, provider: &str) -> EngineResult<Option<StoredToken>> {
        guard(&self.state)?;
        Ok(self.tables.read().tokens.get(provider).cloned())
    }

    async fn set_token(&self, provider: &str, token: &StoredToken) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables
            .write()
            .tokens
            .insert(provider.to_string(), token.clone());
        Ok(())
    }

    async fn remove_token(&self, provider: &str) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().tokens.remove(provider);
        Ok(())
    }

    async fn get_username(&self) -> EngineResult<Option<String>> {
        guard(&self.state)?;
        Ok(self.tables.read().username.clone())
    }

    async fn set_username(&self, username: &str) -> EngineResult<()> {
        guard(&self.state)?;
        self.tables.write().username = Some(username.to_string());
        Ok(())
    }

    async fn remove_all(&self) -> EngineResult<()> {
        guard(&self.state)?;
        *self.tables.write() = AuthTables::default();
        Ok(())
    }
}

// ---------------------------------------------------------------------
// App config / user / session storage (server wrapper)
// ---------------------------------------------------------------------

/// In-memory [`AppConfigStoragePort`]
pub struct MemoryAppConfigStorage {
    state: RwLock<PortState>,
    configs: RwLock<HashMap<String, Value>>,
}

impl MemoryAppConfigStorage {
    /// Create an app-config storage
    pub fn new(_tenant: TenantId) -> Self {
        Self {
            state: RwLock::new(PortState::Created),
            configs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StorageLifecycle for MemoryAppConfigStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl AppConfigStoragePort for MemoryAppConfigStorage {
    async fn save_config(&self, id: &str, config: &Value) -> EngineResult<()> {
        guard(&self.state)?;
        self.configs
            .write()
            .insert(id.to_string(), config.clone());
        Ok(())
    }

    async fn get_config(&self, id: &str) -> EngineResult<Option<Value>> {
        guard(&self.state)?;
        Ok(self.configs.read().get(id).cloned())
    }

    async fn get_all_configs(&self) -> EngineResult<Vec<(String, Value)>> {
        guard(&self.state)?;
        let mut configs: Vec<(String, Value)> = self
            .configs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        configs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(configs)
    }

    async fn delete_config(&self, id: &str) -> EngineResult<()> {
        guard(&self.state)?;
        self.configs.write().remove(id);
        Ok(())
    }
}

/// In-memory [`UserStoragePort`]
pub struct MemoryUserStorage {
    state: RwLock<PortState>,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStorage {
    /// Create a user storage
    pub fn new(_tenant: TenantId) -> Self {
        Self {
            state: RwLock::new(PortState::Created),
            users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StorageLifecycle for MemoryUserStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl UserStoragePort for MemoryUserStorage {
    async fn save_user(&self, user: &UserRecord) -> EngineResult<()> {
        guard(&self.state)?;
        self.users.write().insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user_by_email(&self, email: &str) -> EngineResult<Option<UserRecord>> {
        guard(&self.state)?;
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn delete_user(&self, id: &str) -> EngineResult<()> {
        guard(&self.state)?;
        self.users.write().remove(id);
        Ok(())
    }
}

/// In-memory [`SessionStoragePort`]
pub struct MemorySessionStorage {
    state: RwLock<PortState>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStorage {
    /// Create a session storage
    pub fn new(_tenant: TenantId) -> Self {
        Self {
            state: RwLock::new(PortState::Created),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StorageLifecycle for MemorySessionStorage {
    async fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Ready;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.write() = PortState::Closed;
        Ok(())
    }
}

#[async_trait]
impl SessionStoragePort for MemorySessionStorage {
    async fn save_session(&self, session: &SessionRecord) -> EngineResult<()> {
        guard(&self.state)?;
        self.sessions
            .write()
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token: &str) -> EngineResult<Option<SessionRecord>> {
        guard(&self.state)?;
        Ok(self.sessions.read().get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> EngineResult<()> {
        guard(&self.state)?;
        self.sessions.write().remove(token);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        guard(&self.state)?;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}
