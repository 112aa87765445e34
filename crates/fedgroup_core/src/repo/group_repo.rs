//! Group store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD primitives over the `groups` and `group_membership`
//!   relations.
//! - Keep the existence cache coherent with writes made through this store.
//! - Defer existence questions to registered backends before local storage.
//!
//! # Invariants
//! - A `(uid, gid)` pair is inserted at most once: `add_to_group` checks
//!   membership before inserting.
//! - `delete_group` removes the group row and all its memberships in one
//!   transaction and drops the cache entry.
//! - Reads tolerate membership rows whose group row is missing; such gids are
//!   returned but never cached as existing.
//! - Guest (blank) uids never reach storage on reads and are rejected on
//!   writes.
//! - Every gid argument is normalized before it reaches storage or the cache.
//!   Writes reject malformed gids; reads and removals treat them as absent.

use crate::backend::registry::{BackendRegistry, ResolvedBackend};
use crate::backend::GroupBackend;
use crate::cache::{ExistenceCache, MemoryExistenceCache};
use crate::db::DbError;
use crate::delegate::{DelegateError, DelegateResult};
use crate::model::group::{
    is_guest_uid, normalize_group_id, GroupId, GroupIdError, Membership, UserId,
};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Group store error.
#[derive(Debug)]
pub enum RepoError {
    /// Storage transport failure.
    Db(DbError),
    /// Write attempted with a malformed group id.
    InvalidGroupId(GroupIdError),
    /// Write attempted for the guest pseudo-user.
    GuestUser,
    /// A registered backend failed while probing existence.
    Delegate(DelegateError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidGroupId(err) => write!(f, "{err}"),
            Self::GuestUser => write!(f, "guest user cannot hold group memberships"),
            Self::Delegate(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidGroupId(err) => Some(err),
            Self::GuestUser => None,
            Self::Delegate(err) => Some(err),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<GroupIdError> for RepoError {
    fn from(value: GroupIdError) -> Self {
        Self::InvalidGroupId(value)
    }
}

impl From<DelegateError> for RepoError {
    fn from(value: DelegateError) -> Self {
        Self::Delegate(value)
    }
}

/// Query options for listing groups.
///
/// `search` matches case-insensitively anywhere in the gid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupListQuery {
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Query options for listing members of one group.
///
/// `search` matches case-sensitively anywhere in the uid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberListQuery {
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for group and membership operations.
pub trait GroupRepository {
    /// Inserts a group row if absent; `false` when it already existed.
    fn create_group(&self, gid: &str) -> RepoResult<bool>;
    /// Deletes a group with all memberships; `false` when it did not exist.
    fn delete_group(&self, gid: &str) -> RepoResult<bool>;
    /// Resolver-aware existence check.
    fn group_exists(&self, gid: &str) -> RepoResult<bool>;
    fn in_group(&self, uid: &str, gid: &str) -> RepoResult<bool>;
    /// Adds a membership; `false` when the pair was already present.
    fn add_to_group(&self, uid: &str, gid: &str) -> RepoResult<bool>;
    /// Removes a membership; always `true`, present or not.
    fn remove_from_group(&self, uid: &str, gid: &str) -> RepoResult<bool>;
    fn get_user_groups(&self, uid: &str) -> RepoResult<BTreeSet<GroupId>>;
    fn users_in_group(&self, gid: &str, query: &MemberListQuery) -> RepoResult<Vec<UserId>>;
    fn count_users_in_group(&self, gid: &str, search: Option<&str>) -> RepoResult<u64>;
    fn get_groups(&self, query: &GroupListQuery) -> RepoResult<Vec<GroupId>>;
}

/// SQLite-backed group store.
pub struct SqliteGroupRepository<'conn> {
    conn: &'conn Connection,
    cache: Arc<dyn ExistenceCache>,
    backends: Arc<BackendRegistry>,
}

impl<'conn> SqliteGroupRepository<'conn> {
    /// Store with a private unbounded cache and no delegate backends.
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            cache: Arc::new(MemoryExistenceCache::new()),
            backends: Arc::new(BackendRegistry::empty()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ExistenceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_backends(mut self, backends: Arc<BackendRegistry>) -> Self {
        self.backends = backends;
        self
    }

    pub fn cache(&self) -> &Arc<dyn ExistenceCache> {
        &self.cache
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }

    /// Returns the first registered backend claiming `gid`, if any.
    pub fn resolve_authoritative_backend(
        &self,
        gid: &str,
    ) -> RepoResult<Option<ResolvedBackend>> {
        Ok(self.backends.resolve_authoritative_backend(gid)?)
    }

    /// Existence in this store only: cache first, then storage.
    pub fn local_group_exists(&self, gid: &str) -> RepoResult<bool> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(false);
        };
        if self.cache.has(&gid) {
            return Ok(true);
        }

        if group_row_exists(self.conn, &gid)? {
            self.cache.remember(&gid);
            return Ok(true);
        }

        Ok(false)
    }

    /// Lists membership pairs ordered by gid then uid, optionally for one user.
    ///
    /// Orphaned rows are included. Guest uids yield nothing.
    pub fn list_memberships(&self, uid: Option<&str>) -> RepoResult<Vec<Membership>> {
        let mut sql = String::from("SELECT DISTINCT uid, gid FROM group_membership");
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(uid) = uid {
            if is_guest_uid(uid) {
                return Ok(Vec::new());
            }
            sql.push_str(" WHERE uid = ?");
            bind_values.push(Value::Text(uid.to_string()));
        }
        sql.push_str(" ORDER BY gid ASC, uid ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut memberships = Vec::new();
        while let Some(row) = rows.next()? {
            memberships.push(Membership {
                uid: row.get("uid")?,
                gid: row.get("gid")?,
            });
        }

        Ok(memberships)
    }
}

impl GroupRepository for SqliteGroupRepository<'_> {
    fn create_group(&self, gid: &str) -> RepoResult<bool> {
        let gid = normalize_group_id(gid)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO groups (gid) VALUES (?1);",
            [gid.as_str()],
        )?;
        self.cache.remember(&gid);

        debug!(
            "event=group_create module=repo status=ok gid={gid} created={}",
            changed > 0
        );
        Ok(changed > 0)
    }

    fn delete_group(&self, gid: &str) -> RepoResult<bool> {
        let Some(gid) = lookup_gid(gid) else {
            debug!("event=group_delete module=repo status=invalid_gid");
            return Ok(false);
        };
        let tx = self.conn.unchecked_transaction()?;
        let removed_group = tx.execute("DELETE FROM groups WHERE gid = ?1;", [gid.as_str()])?;
        if removed_group == 0 {
            drop(tx);
            self.cache.forget(&gid);
            debug!("event=group_delete module=repo status=missing gid={gid}");
            return Ok(false);
        }

        let removed_members = tx.execute(
            "DELETE FROM group_membership WHERE gid = ?1;",
            [gid.as_str()],
        )?;
        tx.commit()?;
        self.cache.forget(&gid);

        debug!(
            "event=group_delete module=repo status=ok gid={gid} memberships_removed={removed_members}"
        );
        Ok(true)
    }

    fn group_exists(&self, gid: &str) -> RepoResult<bool> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(false);
        };
        if let Some(resolved) = self.resolve_authoritative_backend(&gid)? {
            debug!(
                "event=group_exists module=repo status=delegated gid={gid} backend={}",
                resolved.backend_id
            );
            return Ok(true);
        }

        self.local_group_exists(&gid)
    }

    fn in_group(&self, uid: &str, gid: &str) -> RepoResult<bool> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(false);
        };
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM group_membership
                WHERE uid = ?1 AND gid = ?2
            );",
            params![uid, gid],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn add_to_group(&self, uid: &str, gid: &str) -> RepoResult<bool> {
        if is_guest_uid(uid) {
            return Err(RepoError::GuestUser);
        }
        let gid = normalize_group_id(gid)?;

        if self.in_group(uid, &gid)? {
            debug!("event=membership_add module=repo status=noop uid={uid} gid={gid}");
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO group_membership (uid, gid) VALUES (?1, ?2);",
            params![uid, gid.as_str()],
        )?;

        debug!("event=membership_add module=repo status=ok uid={uid} gid={gid}");
        Ok(true)
    }

    fn remove_from_group(&self, uid: &str, gid: &str) -> RepoResult<bool> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(true);
        };
        let removed = self.conn.execute(
            "DELETE FROM group_membership WHERE uid = ?1 AND gid = ?2;",
            params![uid, gid],
        )?;

        debug!("event=membership_remove module=repo status=ok uid={uid} gid={gid} rows={removed}");
        Ok(true)
    }

    fn get_user_groups(&self, uid: &str) -> RepoResult<BTreeSet<GroupId>> {
        if is_guest_uid(uid) {
            return Ok(BTreeSet::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.gid AS gid, g.gid IS NOT NULL AS known
             FROM group_membership m
             LEFT JOIN groups g ON g.gid = m.gid
             WHERE m.uid = ?1;",
        )?;
        let mut rows = stmt.query([uid])?;
        let mut groups = BTreeSet::new();
        while let Some(row) = rows.next()? {
            let gid: String = row.get("gid")?;
            let known: bool = row.get("known")?;
            if known {
                self.cache.remember(&gid);
            } else {
                warn!("event=membership_orphan module=repo status=detected uid={uid} gid={gid}");
            }
            groups.insert(gid);
        }

        Ok(groups)
    }

    fn users_in_group(&self, gid: &str, query: &MemberListQuery) -> RepoResult<Vec<UserId>> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(Vec::new());
        };
        let mut sql = String::from("SELECT DISTINCT uid FROM group_membership WHERE gid = ?");
        let mut bind_values = vec![Value::Text(gid)];

        if let Some(search) = non_empty(query.search.as_deref()) {
            sql.push_str(" AND instr(uid, ?) > 0");
            bind_values.push(Value::Text(search.to_string()));
        }

        sql.push_str(" ORDER BY uid ASC");
        push_pagination(&mut sql, &mut bind_values, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(row.get("uid")?);
        }

        Ok(users)
    }

    fn count_users_in_group(&self, gid: &str, search: Option<&str>) -> RepoResult<u64> {
        let Some(gid) = lookup_gid(gid) else {
            return Ok(0);
        };
        let mut sql =
            String::from("SELECT COUNT(DISTINCT uid) FROM group_membership WHERE gid = ?");
        let mut bind_values = vec![Value::Text(gid)];

        if let Some(search) = non_empty(search) {
            sql.push_str(" AND instr(uid, ?) > 0");
            bind_values.push(Value::Text(search.to_string()));
        }

        let count: i64 =
            self.conn
                .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn get_groups(&self, query: &GroupListQuery) -> RepoResult<Vec<GroupId>> {
        let mut sql = String::from("SELECT gid FROM groups WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(search) = non_empty(query.search.as_deref()) {
            sql.push_str(" AND instr(lower(gid), lower(?)) > 0");
            bind_values.push(Value::Text(search.to_string()));
        }

        sql.push_str(" ORDER BY gid ASC");
        push_pagination(&mut sql, &mut bind_values, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(row.get("gid")?);
        }

        Ok(groups)
    }
}

impl GroupBackend for SqliteGroupRepository<'_> {
    fn group_exists(&self, gid: &str) -> DelegateResult<bool> {
        self.local_group_exists(gid)
            .map_err(|err| DelegateError::new("sqlite", "storage_failure", err.to_string()))
    }
}

fn group_row_exists(conn: &Connection, gid: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM groups WHERE gid = ?1);",
        [gid],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn lookup_gid(gid: &str) -> Option<GroupId> {
    normalize_group_id(gid).ok()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

fn push_pagination(sql: &mut String, bind_values: &mut Vec<Value>, limit: Option<u32>, offset: u32) {
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        if offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(offset)));
        }
    } else if offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        bind_values.push(Value::Integer(i64::from(offset)));
    }
}
