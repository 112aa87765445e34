//! Administrative group membership toggling.
//!
//! # Responsibility
//! - Add or remove a user from the host's single administrative group.
//!
//! # Invariants
//! - The administrative group is resolved through the host group manager on
//!   every call; a missing group is a delegate failure, not a silent no-op.

use crate::delegate::{DelegateError, DelegateResult, GroupManager};
use log::info;
use std::sync::Arc;

/// Thin adapter over the host group manager for admin grants.
pub struct PrivilegeAdapter {
    group_manager: Arc<dyn GroupManager>,
    admin_group: String,
}

impl PrivilegeAdapter {
    pub fn new(group_manager: Arc<dyn GroupManager>, admin_group: impl Into<String>) -> Self {
        Self {
            group_manager,
            admin_group: admin_group.into(),
        }
    }

    pub fn admin_group(&self) -> &str {
        &self.admin_group
    }

    /// Adds `uid` to (or removes it from) the administrative group.
    pub fn set_admin(&self, uid: &str, is_admin: bool) -> DelegateResult<()> {
        let group = self.group_manager.get(&self.admin_group)?.ok_or_else(|| {
            DelegateError::new(
                "group_manager",
                "admin_group_missing",
                format!("administrative group `{}` does not exist", self.admin_group),
            )
        })?;

        if is_admin {
            group.add_user(uid)?;
        } else {
            group.remove_user(uid)?;
        }

        info!(
            "event=set_admin module=service status=ok uid={uid} group={} is_admin={is_admin}",
            self.admin_group
        );
        Ok(())
    }
}
