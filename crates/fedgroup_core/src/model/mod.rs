//! Group membership domain model.
//!
//! # Responsibility
//! - Define the identifiers shared by store and reconciler.
//! - Own group identifier normalization rules.
//!
//! # Invariants
//! - A group is identified solely by its `gid`; it carries no other attributes.
//! - A membership is owned by its `(uid, gid)` pair and never shared.

pub mod group;
