// Copyright (c) 2025 - Cowboy AI, Inc.
//! Storage ports
//!
//! This module defines the persistence interfaces the engine is built
//! against. Implementations are injected at construction: an embedded KV
//! store on clients, a relational store on servers, the in-memory ports
//! in [`memory`] for tests and embedders.
//!
//! # Lifecycle
//!
//! Every port follows `initialize` → usable → `close`. Operations on an
//! uninitialized or closed port may fail with a storage error.
//!
//! # Tenancy
//!
//! Ports are constructed for exactly one tenant; every operation is
//! implicitly partitioned by that tenant id. Handing a manager a port is
//! handing it one partition, which is what prevents accidental
//! cross-tenant reads.
//!
//! # Atomicity contract
//!
//! Implementations must provide atomic compound writes for
//! `(event append + audit append + merkle root update)`, exposed as
//! [`EventStoragePort::append_events_atomic`], and for entity save with
//! version bump. An implementation that cannot provide atomicity must
//! fail `initialize` with a storage error rather than degrade silently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    AuditLogEntry, Entity, EventCursor, FormSubmission, PotentialDuplicate, SearchCriteria,
    SyncLevel,
};
use crate::errors::EngineResult;
use crate::merkle::MerkleHash;

pub mod memory;

pub use memory::{
    MemoryAppConfigStorage, MemoryAuthStorage, MemoryEntityStorage, MemoryEventStorage,
    MemorySessionStorage, MemoryUserStorage,
};

/// The four sync high-water marks kept per store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMark {
    /// Timestamp up to which local events were pushed to the server
    LastPushInternal,
    /// Timestamp up to which remote events were pulled from the server
    LastPullInternal,
    /// Timestamp up to which events were pushed to the external system
    LastPushExternal,
    /// Timestamp up to which records were pulled from the external system
    LastPullExternal,
}

/// Shared lifecycle of every storage port
#[async_trait]
pub trait StorageLifecycle: Send + Sync {
    /// Prepare the port for use (schema, indices, atomicity probe)
    ///
    /// Must fail if the backing engine cannot provide the atomic
    /// compound writes the engine requires.
    async fn initialize(&self) -> EngineResult<()>;

    /// Flush and release resources; the port is unusable afterwards
    async fn close(&self) -> EngineResult<()>;
}

/// Persistence for events, audit entries, the Merkle root, sync marks
/// and duplicate records
///
/// The event sequence and the audit log are exclusively owned by this
/// port; primary key of an event is `(tenant_id, event_guid)`.
#[async_trait]
pub trait EventStoragePort: StorageLifecycle {
    /// Append events, audit entries and the new Merkle root atomically
    ///
    /// Either everything is persisted or nothing is. Returns the
    /// internal ids assigned to the appended events, in input order.
    async fn append_events_atomic(
        &self,
        events: &[FormSubmission],
        audit_entries: &[AuditLogEntry],
        merkle_root: MerkleHash,
    ) -> EngineResult<Vec<u64>>;

    /// All events in `(timestamp ASC, guid ASC)` order
    async fn get_all_events(&self) -> EngineResult<Vec<FormSubmission>>;

    /// Events with `timestamp >= since`, in the stable iteration order
    async fn get_events_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<FormSubmission>>;

    /// One page of events with `timestamp >= since`, resuming strictly
    /// after `after` when given
    async fn get_events_page(
        &self,
        since: DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> EngineResult<Vec<FormSubmission>>;

    /// Whether an event with this form guid was already appended
    async fn is_event_existed(&self, form_guid: &str) -> EngineResult<bool>;

    /// Load one event by form guid
    async fn get_event(&self, form_guid: &str) -> EngineResult<Option<FormSubmission>>;

    /// Set the sync level of one event, keyed by form guid
    ///
    /// Implementations persist whatever level is given; the monotonic
    /// upgrade rule is enforced by the event store wrapper.
    async fn update_sync_level(&self, form_guid: &str, level: SyncLevel) -> EngineResult<()>;

    /// Append audit entries
    async fn save_audit(&self, entries: &[AuditLogEntry]) -> EngineResult<()>;

    /// All audit entries in `timestamp ASC` order
    async fn get_audit_all(&self) -> EngineResult<Vec<AuditLogEntry>>;

    /// Audit entries with `timestamp >= since`
    async fn get_audit_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<AuditLogEntry>>;

    /// Audit trail of one entity in `timestamp ASC` order
    async fn get_audit_by_entity(&self, entity_guid: &str) -> EngineResult<Vec<AuditLogEntry>>;

    /// Persist the Merkle root
    async fn save_merkle_root(&self, root: MerkleHash) -> EngineResult<()>;

    /// Load the persisted Merkle root
    async fn get_merkle_root(&self) -> EngineResult<Option<MerkleHash>>;

    /// Read one sync high-water mark
    async fn get_sync_mark(&self, mark: SyncMark) -> EngineResult<Option<DateTime<Utc>>>;

    /// Write one sync high-water mark
    async fn set_sync_mark(&self, mark: SyncMark, at: DateTime<Utc>) -> EngineResult<()>;

    /// Record a potential duplicate pair
    async fn save_potential_duplicate(&self, pair: &PotentialDuplicate) -> EngineResult<()>;

    /// All recorded duplicate pairs
    async fn get_potential_duplicates(&self) -> EngineResult<Vec<PotentialDuplicate>>;

    /// Replace a duplicate pair record (matched by its unordered key)
    async fn update_potential_duplicate(&self, pair: &PotentialDuplicate) -> EngineResult<()>;

    /// Drop all events, audit entries, marks and the root for this
    /// tenant
    async fn clear(&self) -> EngineResult<()>;
}

/// Persistence for materialized entities
///
/// Entity records are exclusively owned by this port; primary key is
/// `(tenant_id, guid)` with a unique secondary index on
/// `(tenant_id, external_id)` where set.
#[async_trait]
pub trait EntityStoragePort: StorageLifecycle {
    /// Persist an entity, assigning an internal id on first save
    ///
    /// Returns the stored entity including its assigned id.
    async fn save(&self, entity: &Entity) -> EngineResult<Entity>;

    /// Load one entity by guid, tombstoned or not
    async fn get_by_guid(&self, guid: &str) -> EngineResult<Option<Entity>>;

    /// Load one entity by its foreign-system id
    async fn get_by_external_id(&self, external_id: &str) -> EngineResult<Option<Entity>>;

    /// Entities matching the criteria, sorted `last_updated DESC`
    ///
    /// Tombstoned entities are excluded; offset and limit come from the
    /// criteria.
    async fn search(&self, criteria: &SearchCriteria) -> EngineResult<Vec<Entity>>;

    /// All non-tombstoned entities
    async fn get_all(&self) -> EngineResult<Vec<Entity>>;

    /// Hard-delete one entity record
    async fn delete(&self, guid: &str) -> EngineResult<()>;

    /// Entities with `last_updated >= since`, tombstoned included
    async fn get_modified_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<Entity>>;

    /// Drop all entity records for this tenant
    async fn clear(&self) -> EngineResult<()>;
}

/// A bearer token held for one auth provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    /// The bearer token
    pub token: String,
    /// Expiry, if the provider reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Whether the token is expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Persistence for auth tokens, keyed by provider name
#[async_trait]
pub trait AuthStoragePort: StorageLifecycle {
    /// Token held for a provider, if any
    async fn get_token(&self, provider: &str) -> EngineResult<Option<StoredToken>>;

    /// Store a provider's token
    async fn set_token(&self, provider: &str, token: &StoredToken) -> EngineResult<()>;

    /// Drop a provider's token
    async fn remove_token(&self, provider: &str) -> EngineResult<()>;

    /// The logged-in username, if any
    async fn get_username(&self) -> EngineResult<Option<String>>;

    /// Record the logged-in username
    async fn set_username(&self, username: &str) -> EngineResult<()>;

    /// Drop all tokens and the username
    async fn remove_all(&self) -> EngineResult<()>;
}

/// Small CRUD for app configuration blobs (server wrapper only)
#[async_trait]
pub trait AppConfigStoragePort: StorageLifecycle {
    /// Store a configuration blob under an id
    async fn save_config(&self, id: &str, config: &Value) -> EngineResult<()>;

    /// Load one configuration blob
    async fn get_config(&self, id: &str) -> EngineResult<Option<Value>>;

    /// All configuration blobs as `(id, config)` pairs
    async fn get_all_configs(&self) -> EngineResult<Vec<(String, Value)>>;

    /// Remove one configuration blob
    async fn delete_config(&self, id: &str) -> EngineResult<()>;
}

/// A user record (server wrapper only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique user id
    pub id: String,
    /// Login email
    pub email: String,
    /// Hashed password
    pub password_hash: String,
    /// Role name
    pub role: String,
}

/// Small CRUD for users (server wrapper only)
#[async_trait]
pub trait UserStoragePort: StorageLifecycle {
    /// Store a user record
    async fn save_user(&self, user: &UserRecord) -> EngineResult<()>;

    /// Load a user by email
    async fn get_user_by_email(&self, email: &str) -> EngineResult<Option<UserRecord>>;

    /// Remove a user
    async fn delete_user(&self, id: &str) -> EngineResult<()>;
}

/// A session record (server wrapper only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session token
    pub token: String,
    /// Owning user id
    pub user_id: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Small CRUD for sessions (server wrapper only)
#[async_trait]
pub trait SessionStoragePort: StorageLifecycle {
    /// Store a session
    async fn save_session(&self, session: &SessionRecord) -> EngineResult<()>;

    /// Load a session by token
    async fn get_session(&self, token: &str) -> EngineResult<Option<SessionRecord>>;

    /// Remove a session
    async fn delete_session(&self, token: &str) -> EngineResult<()>;

    /// Remove all sessions whose expiry is in the past
    async fn purge_expired(&self, now: DateTime<Utc>) -> EngineResult<usize>;
}
