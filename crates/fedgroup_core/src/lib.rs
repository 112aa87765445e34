//! Group membership reconciliation for externally authenticated identities.
//! This crate owns the group store, its existence cache, backend resolution
//! and the reconciler that converges asserted group sets into storage.

pub mod backend;
pub mod cache;
pub mod config;
pub mod db;
pub mod delegate;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use backend::registry::{
    BackendRegistry, BackendRegistryBuilder, BackendRegistryError, ResolvedBackend,
};
pub use backend::GroupBackend;
pub use cache::{BoundedExistenceCache, ExistenceCache, MemoryExistenceCache};
pub use config::{ConfigError, SyncConfig};
pub use delegate::{DelegateError, DelegateResult, GroupManager, ManagedGroup, SubAdminDelegate};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::group::{normalize_group_id, GroupId, GroupIdError, Membership, UserId};
pub use repo::group_repo::{
    GroupListQuery, GroupRepository, MemberListQuery, RepoError, RepoResult,
    SqliteGroupRepository,
};
pub use service::privilege::PrivilegeAdapter;
pub use service::reconcile_service::{
    MembershipReconciler, ReconcileError, ReconcileReport, SkipReason, SkippedGroup,
};

/// Minimal health-check API for host integration probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
