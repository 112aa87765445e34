//! Group backend delegation.
//!
//! # Responsibility
//! - Define the one-method capability every group backend exposes.
//! - Resolve which registered backend is authoritative for a group id.
//!
//! # Invariants
//! - Registration order is priority: earlier backends shadow later ones.
//! - Resolution is read-only; no backend is mutated through this module.

pub mod registry;

use crate::delegate::DelegateResult;

/// Existence probe implemented by every group backend.
pub trait GroupBackend {
    fn group_exists(&self, gid: &str) -> DelegateResult<bool>;
}
