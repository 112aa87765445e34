use fedgroup_core::db::open_db_in_memory;
use fedgroup_core::{
    BackendRegistry, DelegateError, DelegateResult, GroupManager, GroupRepository, ManagedGroup,
    MembershipReconciler, PrivilegeAdapter, ReconcileError, SkipReason,
    SqliteGroupRepository, SubAdminDelegate, SyncConfig,
};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingSubAdmins {
    grants: Mutex<BTreeSet<(String, String)>>,
    fail_add_for: Mutex<Option<String>>,
}

impl RecordingSubAdmins {
    fn holds(&self, uid: &str, gid: &str) -> bool {
        self.grants
            .lock()
            .unwrap()
            .contains(&(uid.to_string(), gid.to_string()))
    }

    fn fail_add_for(&self, gid: Option<&str>) {
        *self.fail_add_for.lock().unwrap() = gid.map(str::to_string);
    }
}

impl SubAdminDelegate for RecordingSubAdmins {
    fn is_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<bool> {
        Ok(self.holds(uid, gid))
    }

    fn add_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<()> {
        if self.fail_add_for.lock().unwrap().as_deref() == Some(gid) {
            return Err(DelegateError::new("sub_admin", "write_failed", "grant rejected"));
        }
        self.grants
            .lock()
            .unwrap()
            .insert((uid.to_string(), gid.to_string()));
        Ok(())
    }

    fn remove_sub_admin(&self, uid: &str, gid: &str) -> DelegateResult<()> {
        self.grants
            .lock()
            .unwrap()
            .remove(&(uid.to_string(), gid.to_string()));
        Ok(())
    }
}

struct DirectoryBackend {
    groups: BTreeSet<String>,
}

impl fedgroup_core::GroupBackend for DirectoryBackend {
    fn group_exists(&self, gid: &str) -> DelegateResult<bool> {
        Ok(self.groups.contains(gid))
    }
}

#[derive(Default)]
struct HostGroup {
    members: Mutex<BTreeSet<String>>,
}

impl ManagedGroup for HostGroup {
    fn add_user(&self, uid: &str) -> DelegateResult<()> {
        self.members.lock().unwrap().insert(uid.to_string());
        Ok(())
    }

    fn remove_user(&self, uid: &str) -> DelegateResult<()> {
        self.members.lock().unwrap().remove(uid);
        Ok(())
    }
}

#[derive(Default)]
struct HostGroupManager {
    groups: BTreeMap<String, Arc<HostGroup>>,
}

impl HostGroupManager {
    fn with_group(gid: &str) -> (Arc<Self>, Arc<HostGroup>) {
        let group = Arc::new(HostGroup::default());
        let mut groups = BTreeMap::new();
        groups.insert(gid.to_string(), group.clone());
        (Arc::new(Self { groups }), group)
    }
}

impl GroupManager for HostGroupManager {
    fn get(&self, gid: &str) -> DelegateResult<Option<Arc<dyn ManagedGroup>>> {
        Ok(self
            .groups
            .get(gid)
            .map(|group| group.clone() as Arc<dyn ManagedGroup>))
    }
}

struct Fixture {
    sub_admins: Arc<RecordingSubAdmins>,
    admin_group: Arc<HostGroup>,
    manager: Arc<HostGroupManager>,
}

impl Fixture {
    fn new() -> Self {
        let (manager, admin_group) = HostGroupManager::with_group("admin");
        Self {
            sub_admins: Arc::new(RecordingSubAdmins::default()),
            admin_group,
            manager,
        }
    }

    fn reconciler<'conn>(
        &self,
        conn: &'conn Connection,
        config: SyncConfig,
    ) -> MembershipReconciler<SqliteGroupRepository<'conn>> {
        self.reconciler_with(SqliteGroupRepository::new(conn), config)
    }

    fn reconciler_with<'conn>(
        &self,
        repo: SqliteGroupRepository<'conn>,
        config: SyncConfig,
    ) -> MembershipReconciler<SqliteGroupRepository<'conn>> {
        let privileges = PrivilegeAdapter::new(self.manager.clone(), config.admin_group.clone());
        MembershipReconciler::new(repo, self.sub_admins.clone(), privileges, config)
    }
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn reconcile_converges_and_deletes_emptied_group() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let first = reconciler.reconcile("alice", ["A", "B"], false).unwrap();
    assert_eq!(first.created, vec!["A", "B"]);
    assert_eq!(first.added, vec!["A", "B"]);

    let second = reconciler.reconcile("alice", ["B", "C"], false).unwrap();
    assert_eq!(second.created, vec!["C"]);
    assert_eq!(second.added, vec!["C"]);
    assert_eq!(second.removed, vec!["A"]);
    assert_eq!(second.deleted, vec!["A"]);

    let repo = reconciler.repo();
    assert_eq!(repo.get_user_groups("alice").unwrap(), set(&["B", "C"]));
    assert!(!repo.group_exists("A").unwrap());
    assert!(repo.group_exists("C").unwrap());
}

#[test]
fn reconcile_keeps_group_that_still_has_members() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());
    reconciler.reconcile("alice", ["A", "B"], false).unwrap();
    reconciler.reconcile("bob", ["A"], false).unwrap();

    let report = reconciler.reconcile("alice", ["B", "C"], false).unwrap();
    assert_eq!(report.removed, vec!["A"]);
    assert!(report.deleted.is_empty());

    let repo = reconciler.repo();
    assert!(repo.group_exists("A").unwrap());
    assert_eq!(repo.get_user_groups("bob").unwrap(), set(&["A"]));
}

#[test]
fn rerunning_reconcile_is_noop() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    reconciler.reconcile("alice", ["A", "B"], true).unwrap();
    let again = reconciler.reconcile("alice", ["B", "A"], true).unwrap();
    assert!(again.is_noop());
}

#[test]
fn reconcile_to_empty_set_removes_everything() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());
    reconciler.reconcile("alice", ["A", "B"], false).unwrap();

    let report = reconciler
        .reconcile("alice", Vec::<String>::new(), false)
        .unwrap();
    assert_eq!(report.deleted, vec!["A", "B"]);
    assert!(reconciler.repo().get_user_groups("alice").unwrap().is_empty());
}

#[test]
fn sub_admin_rights_follow_membership() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let granted = reconciler.reconcile("alice", ["A", "B"], true).unwrap();
    assert_eq!(granted.sub_admin_granted, vec!["A", "B"]);
    assert!(fixture.sub_admins.holds("alice", "A"));
    assert!(fixture.sub_admins.holds("alice", "B"));

    let revoked = reconciler.reconcile("alice", ["B"], false).unwrap();
    assert_eq!(revoked.sub_admin_revoked, vec!["A"]);
    assert!(!fixture.sub_admins.holds("alice", "A"));
    assert!(fixture.sub_admins.holds("alice", "B"));
}

#[test]
fn sub_admin_is_not_granted_without_flag() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let report = reconciler.reconcile("alice", ["A"], false).unwrap();
    assert!(report.sub_admin_granted.is_empty());
    assert!(!fixture.sub_admins.holds("alice", "A"));
}

#[test]
fn creation_disabled_skips_unknown_groups_but_joins_existing_ones() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    SqliteGroupRepository::new(&conn)
        .create_group("existing")
        .unwrap();
    let config = SyncConfig {
        allow_group_creation: false,
        ..SyncConfig::default()
    };
    let reconciler = fixture.reconciler(&conn, config);

    let report = reconciler
        .reconcile("alice", ["existing", "unknown"], false)
        .unwrap();
    assert_eq!(report.added, vec!["existing"]);
    assert!(report.created.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].gid, "unknown");
    assert_eq!(report.skipped[0].reason, SkipReason::CreationDisabled);
    assert!(!reconciler.repo().group_exists("unknown").unwrap());
}

#[test]
fn creation_disabled_still_joins_delegate_owned_groups() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let registry = BackendRegistry::builder()
        .register(
            "ldap",
            Arc::new(DirectoryBackend {
                groups: set(&["directory-staff"]),
            }),
        )
        .unwrap()
        .build();
    let repo = SqliteGroupRepository::new(&conn).with_backends(Arc::new(registry));
    let config = SyncConfig {
        allow_group_creation: false,
        ..SyncConfig::default()
    };
    let reconciler = fixture.reconciler_with(repo, config);

    let report = reconciler
        .reconcile("alice", ["directory-staff", "unknown"], false)
        .unwrap();
    assert_eq!(report.created, vec!["directory-staff"]);
    assert_eq!(report.added, vec!["directory-staff"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].gid, "unknown");
    assert_eq!(report.skipped[0].reason, SkipReason::CreationDisabled);

    let repo = reconciler.repo();
    assert!(repo.local_group_exists("directory-staff").unwrap());
    assert!(repo.in_group("alice", "directory-staff").unwrap());
    assert_eq!(
        repo.get_user_groups("alice").unwrap(),
        set(&["directory-staff"])
    );
}

#[test]
fn invalid_target_ids_are_skipped() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let report = reconciler
        .reconcile("alice", [" staff ", "", "bad\u{7}id"], false)
        .unwrap();
    assert_eq!(report.added, vec!["staff"]);
    assert_eq!(report.skipped.len(), 2);
    assert!(report
        .skipped
        .iter()
        .all(|skipped| skipped.reason == SkipReason::InvalidGroupId));
}

#[test]
fn guest_user_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let err = reconciler.reconcile("  ", ["A"], false).unwrap_err();
    assert!(matches!(err, ReconcileError::GuestUser));
    assert!(reconciler.repo().get_groups(&Default::default()).unwrap().is_empty());
}

#[test]
fn partial_failure_keeps_applied_steps_and_rerun_converges() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());
    fixture.sub_admins.fail_add_for(Some("B"));

    let err = reconciler.reconcile("alice", ["A", "B", "C"], true).unwrap_err();
    match err {
        ReconcileError::Delegate(inner) => assert_eq!(inner.code, "write_failed"),
        other => panic!("unexpected error: {other}"),
    }
    // A fully applied, B joined but not promoted, C untouched.
    let repo = reconciler.repo();
    assert_eq!(repo.get_user_groups("alice").unwrap(), set(&["A", "B"]));
    assert!(fixture.sub_admins.holds("alice", "A"));
    assert!(!fixture.sub_admins.holds("alice", "B"));

    fixture.sub_admins.fail_add_for(None);
    let report = reconciler.reconcile("alice", ["A", "B", "C"], true).unwrap();
    assert_eq!(report.added, vec!["C"]);
    assert_eq!(report.sub_admin_granted, vec!["B", "C"]);
    assert_eq!(
        reconciler.repo().get_user_groups("alice").unwrap(),
        set(&["A", "B", "C"])
    );
    for gid in ["A", "B", "C"] {
        assert!(fixture.sub_admins.holds("alice", gid));
    }
}

#[test]
fn granting_sub_admin_promotes_existing_memberships() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());
    reconciler.reconcile("alice", ["A"], false).unwrap();

    let report = reconciler.reconcile("alice", ["A", "B"], true).unwrap();
    assert_eq!(report.added, vec!["B"]);
    assert_eq!(report.sub_admin_granted, vec!["A", "B"]);
    assert!(fixture.sub_admins.holds("alice", "A"));
}

#[test]
fn orphaned_membership_is_cleaned_up() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO group_membership (uid, gid) VALUES ('alice', 'ghost');",
        [],
    )
    .unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    let report = reconciler.reconcile("alice", ["staff"], false).unwrap();
    assert_eq!(report.removed, vec!["ghost"]);
    assert!(report.deleted.is_empty());
    assert_eq!(
        reconciler.repo().get_user_groups("alice").unwrap(),
        set(&["staff"])
    );
}

#[test]
fn set_admin_toggles_admin_group_membership() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(&conn, SyncConfig::default());

    reconciler.set_admin("alice", true).unwrap();
    assert!(fixture.admin_group.members.lock().unwrap().contains("alice"));

    reconciler.set_admin("alice", false).unwrap();
    assert!(!fixture.admin_group.members.lock().unwrap().contains("alice"));
}

#[test]
fn set_admin_fails_when_admin_group_is_missing() {
    let conn = open_db_in_memory().unwrap();
    let fixture = Fixture::new();
    let config = SyncConfig {
        admin_group: "operators".to_string(),
        ..SyncConfig::default()
    };
    let reconciler = fixture.reconciler(&conn, config);

    let err = reconciler.set_admin("alice", true).unwrap_err();
    match err {
        ReconcileError::Delegate(inner) => assert_eq!(inner.code, "admin_group_missing"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        reconciler.set_admin("", true),
        Err(ReconcileError::GuestUser)
    ));
}
