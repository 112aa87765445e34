//! Use-case services over the group store.
//!
//! # Responsibility
//! - Converge persisted membership to externally asserted group sets.
//! - Keep host delegates (sub-admin, group manager) out of the store.

pub mod privilege;
pub mod reconcile_service;
