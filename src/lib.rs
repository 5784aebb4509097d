//! Offline-first, event-sourced data engine for beneficiary registries
//!
//! This library derives entity state deterministically from an
//! append-only event log, keeps the log tamper-evident under a Merkle
//! root, detects duplicate entities, and synchronizes bidirectionally
//! with a central server and (optionally) an external system of record.
//!
//! # Architecture
//!
//! ```text
//! FormSubmission → EventApplierService → EventStore (log + audit + root)
//!                        │                    │
//!                        ▼                    ▼
//!                  EntityStore ←──── sync managers (internal/external)
//! ```
//!
//! Three concerns are entangled and each carries invariants:
//!
//! 1. **Event sourcing + materialization**: a total, deterministic
//!    function from the ordered log to entity state, with pluggable
//!    per-event-type appliers and group/member semantics
//! 2. **Multi-level synchronization**: at-least-once, resumable,
//!    paginated push/pull with independent high-water marks per
//!    direction and system
//! 3. **Integrity and audit**: one immutable audit entry per state
//!    change; a Merkle root over the log as a tamper-evidence
//!    fingerprint
//!
//! # Modules
//!
//! - [`domain`] - the records: forms, entities, audit entries, sync
//!   levels, search criteria
//! - [`storage`] - persistence ports and the in-memory reference ports
//! - [`event_store`] / [`entity_store`] - the two store wrappers
//! - [`appliers`] - the pure applier functions and their registry
//! - [`service`] - the submission pipeline
//! - [`sync`] - internal and external synchronization
//! - [`auth`] - the provider-based auth gate
//! - [`duplicates`] - duplicate detection and resolution
//! - [`merkle`] - the hash tree
//! - [`manager`] - the [`EntityDataManager`] façade
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use registry_engine::{
//!     EntityDataManagerBuilder, MemoryAuthStorage, MemoryEntityStorage,
//!     MemoryEventStorage, SyncServerClient, SyncServerConfig, TenantId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tenant = TenantId::from("clinic-7");
//!     let transport = Arc::new(SyncServerClient::new(SyncServerConfig::new(
//!         "https://sync.example.org",
//!         "clinic-7",
//!     ))?);
//!
//!     let manager = EntityDataManagerBuilder::new(
//!         Arc::new(MemoryEventStorage::new(tenant.clone())),
//!         Arc::new(MemoryEntityStorage::new(tenant.clone())),
//!         Arc::new(MemoryAuthStorage::new(tenant)),
//!         transport,
//!     )
//!     .build()
//!     .await?;
//!
//!     // Submit forms, query entities, sync...
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod appliers;
pub mod auth;
pub mod domain;
pub mod duplicates;
pub mod entity_store;
pub mod errors;
pub mod event_store;
pub mod manager;
pub mod merkle;
pub mod service;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use appliers::{
    AppliedChange, AppliedResult, ApplierRegistry, EntityLookup, EventApplier, FnApplier,
    PrefetchedEntities,
};
pub use auth::{AuthGate, AuthProviderConfig, Credentials, DEFAULT_PROVIDER};
pub use domain::{
    AuditLogEntry, DuplicateStatus, Entity, EntityKind, EventCursor, FieldChange, FieldFilter,
    FilterOp, FormSubmission, PotentialDuplicate, SearchCriteria, SyncLevel, TenantId,
};
pub use duplicates::DuplicateDetector;
pub use entity_store::EntityStore;
pub use errors::{EngineError, EngineResult};
pub use event_store::{EventPage, EventStore, DEFAULT_PAGE_SIZE};
pub use manager::{EntityDataManager, EntityDataManagerBuilder};
pub use merkle::MerkleHash;
pub use service::EventApplierService;
pub use storage::{
    AppConfigStoragePort, AuthStoragePort, EntityStoragePort, EventStoragePort,
    MemoryAppConfigStorage, MemoryAuthStorage, MemoryEntityStorage, MemoryEventStorage,
    MemorySessionStorage, MemoryUserStorage, SessionStoragePort, StorageLifecycle, StoredToken,
    SyncMark, UserStoragePort,
};
pub use sync::{
    client::SyncServerConfig, BackoffPolicy, CancellationFlag, ExternalPushOutcome,
    ExternalSyncAdapter, ExternalSyncContext, ExternalSyncManager, ExternalSyncReport,
    InternalSyncManager, SyncReport, SyncServerClient, SyncTransport,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
