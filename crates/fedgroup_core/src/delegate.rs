//! Capability interfaces for host-side collaborators.
//!
//! # Responsibility
//! - Describe the sub-admin manager and group manager the reconciler calls.
//! - Carry delegate failures as one error envelope.
//!
//! # Invariants
//! - Delegate calls are synchronous; failures propagate unchanged and are
//!   never retried here.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type DelegateResult<T> = Result<T, DelegateError>;

/// Failure reported by (or about) an external delegate capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateError {
    /// Which delegate failed, e.g. `sub_admin` or a backend id.
    pub delegate: String,
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
}

impl DelegateError {
    pub fn new(
        delegate: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            delegate: delegate.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Display for DelegateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.delegate, self.code, self.message)
    }
}

impl Error for DelegateError {}

/// Host capability managing group-scoped administrative rights.
pub trait SubAdminDelegate {
    fn is_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<bool>;
    fn add_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<()>;
    fn remove_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<()>;
}

/// Handle to one host-managed group able to change its members.
pub trait ManagedGroup {
    fn add_user(&self, uid: &str) -> DelegateResult<()>;
    fn remove_user(&self, uid: &str) -> DelegateResult<()>;
}

/// Host capability resolving group ids to managed group handles.
pub trait GroupManager {
    /// Returns `None` when the host knows no group `gid`.
    fn get(&self, gid: &str) -> DelegateResult<Option<Arc<dyn ManagedGroup>>>;
}
