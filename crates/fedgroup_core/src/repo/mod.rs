//! Repository layer over group persistence.
//!
//! # Responsibility
//! - Define the group store contract consumed by the reconciler.
//! - Isolate SQLite query details from reconciliation logic.
//!
//! # Invariants
//! - Absence is reported as `false`/empty, never as an error.
//! - Storage failures surface as `RepoError::Db` and are never swallowed.

pub mod group_repo;
