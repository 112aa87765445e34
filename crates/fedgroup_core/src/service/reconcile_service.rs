//! Membership reconciliation service.
//!
//! # Responsibility
//! - Diff an externally asserted group set against a user's persisted
//!   memberships and apply the minimal create/add/remove/delete steps.
//! - Keep sub-admin grants in step with membership changes.
//!
//! # Invariants
//! - Additions run before removals, each in ascending gid order.
//! - Sub-admin rights on a group are revoked before the membership goes.
//! - A group left with zero members by a removal is deleted.
//! - Steps are independent and idempotent; a failure stops the run without
//!   rolling back earlier steps, and re-running `reconcile` with the same
//!   input converges memberships and, with `grant_sub_admin`, sub-admin grants.

use crate::config::SyncConfig;
use crate::delegate::{DelegateError, SubAdminDelegate};
use crate::model::group::{is_guest_uid, normalize_group_id, GroupId};
use crate::repo::group_repo::{GroupRepository, RepoError};
use crate::service::privilege::PrivilegeAdapter;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Reconciliation failure. Earlier steps of the run stay applied.
#[derive(Debug)]
pub enum ReconcileError {
    /// Reconciliation was requested for the guest pseudo-user.
    GuestUser,
    /// Group store failure.
    Repo(RepoError),
    /// Sub-admin or group manager failure.
    Delegate(DelegateError),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GuestUser => write!(f, "cannot reconcile groups for the guest user"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Delegate(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::GuestUser => None,
            Self::Repo(err) => Some(err),
            Self::Delegate(err) => Some(err),
        }
    }
}

impl From<RepoError> for ReconcileError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::GuestUser => Self::GuestUser,
            other => Self::Repo(other),
        }
    }
}

impl From<DelegateError> for ReconcileError {
    fn from(value: DelegateError) -> Self {
        Self::Delegate(value)
    }
}

/// Why a target group was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The asserted identifier failed normalization.
    InvalidGroupId,
    /// The group exists nowhere and auto-creation is disabled.
    CreationDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGroup {
    pub gid: String,
    pub reason: SkipReason,
}

/// Steps applied by one successful reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub created: Vec<GroupId>,
    pub added: Vec<GroupId>,
    pub removed: Vec<GroupId>,
    pub deleted: Vec<GroupId>,
    pub skipped: Vec<SkippedGroup>,
    pub sub_admin_granted: Vec<GroupId>,
    pub sub_admin_revoked: Vec<GroupId>,
}

impl ReconcileReport {
    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.deleted.is_empty()
            && self.sub_admin_granted.is_empty()
            && self.sub_admin_revoked.is_empty()
    }
}

/// Converges persisted memberships to asserted group sets.
pub struct MembershipReconciler<R: GroupRepository> {
    repo: R,
    sub_admins: Arc<dyn SubAdminDelegate>,
    privileges: PrivilegeAdapter,
    config: SyncConfig,
}

impl<R: GroupRepository> MembershipReconciler<R> {
    pub fn new(
        repo: R,
        sub_admins: Arc<dyn SubAdminDelegate>,
        privileges: PrivilegeAdapter,
        config: SyncConfig,
    ) -> Self {
        Self {
            repo,
            sub_admins,
            privileges,
            config,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Converges `uid`'s memberships to exactly `target_groups`.
    ///
    /// With `grant_sub_admin`, `uid` is also made sub-admin of every target
    /// group it ends up in, including groups it already belonged to.
    ///
    /// # Errors
    /// - `GuestUser` for a blank uid.
    /// - Storage and delegate failures propagate from the failing step; prior
    ///   steps stay applied. Calling again with the same input is safe.
    pub fn reconcile<I, S>(
        &self,
        uid: &str,
        target_groups: I,
        grant_sub_admin: bool,
    ) -> Result<ReconcileReport, ReconcileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if is_guest_uid(uid) {
            return Err(ReconcileError::GuestUser);
        }

        let run_id = Uuid::new_v4();
        let mut report = ReconcileReport::default();
        let targets = normalize_targets(target_groups, &mut report);
        info!(
            "event=reconcile module=service status=start run_id={run_id} uid={uid} targets={} grant_sub_admin={grant_sub_admin}",
            targets.len()
        );

        match self.apply(uid, &targets, grant_sub_admin, &mut report) {
            Ok(()) => {
                info!(
                    "event=reconcile module=service status=ok run_id={run_id} uid={uid} created={} added={} removed={} deleted={} skipped={}",
                    report.created.len(),
                    report.added.len(),
                    report.removed.len(),
                    report.deleted.len(),
                    report.skipped.len()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=reconcile module=service status=error run_id={run_id} uid={uid} applied_added={} applied_removed={} error={err}",
                    report.added.len(),
                    report.removed.len()
                );
                Err(err)
            }
        }
    }

    /// Adds `uid` to or removes it from the administrative group.
    pub fn set_admin(&self, uid: &str, is_admin: bool) -> Result<(), ReconcileError> {
        if is_guest_uid(uid) {
            return Err(ReconcileError::GuestUser);
        }
        self.privileges.set_admin(uid, is_admin)?;
        Ok(())
    }

    fn apply(
        &self,
        uid: &str,
        targets: &BTreeSet<GroupId>,
        grant_sub_admin: bool,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let current = self.repo.get_user_groups(uid)?;

        for gid in targets {
            if !current.contains(gid) {
                if !self.config.allow_group_creation && !self.repo.group_exists(gid)? {
                    warn!(
                        "event=reconcile_skip module=service status=creation_disabled uid={uid} gid={gid}"
                    );
                    report.skipped.push(SkippedGroup {
                        gid: gid.clone(),
                        reason: SkipReason::CreationDisabled,
                    });
                    continue;
                }

                if self.repo.create_group(gid)? {
                    report.created.push(gid.clone());
                }
                if self.repo.add_to_group(uid, gid)? {
                    report.added.push(gid.clone());
                }
            }
            if grant_sub_admin && !self.sub_admins.is_sub_admin(uid, gid)? {
                self.sub_admins.add_sub_admin(uid, gid)?;
                report.sub_admin_granted.push(gid.clone());
            }
        }

        for gid in current.difference(targets) {
            if self.sub_admins.is_sub_admin(uid, gid)? {
                self.sub_admins.remove_sub_admin(uid, gid)?;
                report.sub_admin_revoked.push(gid.clone());
            }

            self.repo.remove_from_group(uid, gid)?;
            report.removed.push(gid.clone());

            if self.repo.count_users_in_group(gid, None)? == 0 && self.repo.delete_group(gid)? {
                report.deleted.push(gid.clone());
            }
        }

        Ok(())
    }
}

fn normalize_targets<I, S>(target_groups: I, report: &mut ReconcileReport) -> BTreeSet<GroupId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut targets = BTreeSet::new();
    for raw in target_groups {
        let raw = raw.as_ref();
        match normalize_group_id(raw) {
            Ok(gid) => {
                targets.insert(gid);
            }
            Err(err) => {
                warn!("event=reconcile_skip module=service status=invalid_group_id error={err}");
                report.skipped.push(SkippedGroup {
                    gid: raw.to_string(),
                    reason: SkipReason::InvalidGroupId,
                });
            }
        }
    }
    targets
}
