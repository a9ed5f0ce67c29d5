//! Relational storage for permissions, menus, roles and their join tables.
//!
//! # Purpose
//! Defines the storage seam used by reconciliation and role authoring, with an
//! in-memory backend for development/tests and a Postgres backend for
//! deployments.
//!
//! # Key invariants
//! - `permission` is unique by (path, method); `menu` by `number`; `role` by
//!   `name`; every join table by its id pair.
//! - Link inserts are conflict tolerant ("insert, do nothing on duplicate").
//! - Multi-step role mutations run through a single [`RbacTx`]; dropping the
//!   handle without [`RbacTx::commit`] rolls every write back.
//! - A role holds a permission only while one of its menus links to it.
//!   [`RbacStore::grant_all`] for the super role is the one exception.
//! - The policy revision is bumped by every write that changes what some role
//!   may do, so each instance can tell when its policy engine is stale.
use crate::model::{
    MenuRecord, MenuUpdate, NewMenu, PermissionRecord, Role, RoleFilter, RolePage,
};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return StoreError::NotFound("row not found".to_string());
        }
        if is_unique_violation(&err) {
            return StoreError::Conflict(err.to_string());
        }
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ambient (non-transactional) storage operations.
///
/// Each call runs on its own pooled connection. Operations that must be
/// atomic with others go through [`RbacStore::begin`].
#[async_trait]
pub trait RbacStore: Send + Sync {
    // Permissions
    async fn find_permission(&self, path: &str, method: &str)
    -> StoreResult<Option<PermissionRecord>>;
    async fn create_permission(
        &self,
        path: &str,
        method: &str,
        name: Option<&str>,
    ) -> StoreResult<PermissionRecord>;
    async fn rename_permission(&self, id: i64, name: &str) -> StoreResult<()>;
    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>>;
    /// Delete permissions outside `keep` together with every menu and role
    /// link referencing them, atomically. Returns the number of permissions
    /// removed.
    async fn prune_permissions(&self, keep: &[i64]) -> StoreResult<u64>;

    // Menus
    async fn find_menu_by_number(&self, number: &str) -> StoreResult<Option<MenuRecord>>;
    async fn create_menu(&self, menu: NewMenu) -> StoreResult<MenuRecord>;
    /// Seeding update: only `name` and `parent_id` change.
    async fn update_menu_seed(&self, id: i64, name: &str, parent_id: i64) -> StoreResult<()>;
    async fn get_menu(&self, id: i64) -> StoreResult<MenuRecord>;
    /// Operator update of `name`, `sort` and `is_disabled`.
    async fn update_menu(&self, id: i64, update: &MenuUpdate) -> StoreResult<MenuRecord>;
    async fn list_menus(&self) -> StoreResult<Vec<MenuRecord>>;
    /// Number of existing menus among `ids`.
    async fn count_menus(&self, ids: &[i64]) -> StoreResult<u64>;
    async fn link_menu_permission(&self, menu_id: i64, permission_id: i64) -> StoreResult<()>;
    /// All (menu_id, permission_id) pairs.
    async fn list_menu_permissions(&self) -> StoreResult<Vec<(i64, i64)>>;
    /// Delete role-menu and menu-permission links whose menu is outside
    /// `keep`, then every role-permission row no longer reachable through the
    /// role's remaining menus, atomically. Menus themselves stay. Returns the
    /// number of rows removed.
    async fn prune_menu_links(&self, keep: &[i64]) -> StoreResult<u64>;
    async fn permissions_for_menus(&self, menu_ids: &[i64]) -> StoreResult<Vec<PermissionRecord>>;

    // Roles
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;
    async fn get_role(&self, id: i64) -> StoreResult<Role>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    async fn page_roles(&self, filter: &RoleFilter) -> StoreResult<RolePage>;
    async fn role_menu_ids(&self, role_id: i64) -> StoreResult<Vec<i64>>;
    async fn role_permissions(&self, role_id: i64) -> StoreResult<Vec<PermissionRecord>>;
    /// Insert the role if no role with `name` exists; return the stored row.
    async fn ensure_role(&self, name: &str, tenant_id: i64) -> StoreResult<Role>;
    /// Link `role_id` to every stored menu and permission.
    async fn grant_all(&self, role_id: i64) -> StoreResult<()>;

    /// Current policy revision; starts at 0.
    async fn policy_revision(&self) -> StoreResult<i64>;
    /// Increment the policy revision outside a transaction; returns the new
    /// value.
    async fn bump_policy_revision(&self) -> StoreResult<i64>;

    async fn begin(&self) -> StoreResult<Box<dyn RbacTx>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Explicit transaction handle threaded through a role mutation.
#[async_trait]
pub trait RbacTx: Send {
    async fn insert_role(&mut self, name: &str, tenant_id: i64) -> StoreResult<Role>;
    async fn update_role(&mut self, id: i64, name: &str, tenant_id: i64) -> StoreResult<Role>;
    async fn delete_role(&mut self, id: i64) -> StoreResult<()>;
    async fn delete_role_menus(&mut self, role_id: i64) -> StoreResult<()>;
    async fn insert_role_menus(&mut self, role_id: i64, menu_ids: &[i64]) -> StoreResult<()>;
    async fn delete_role_permissions(&mut self, role_id: i64) -> StoreResult<()>;
    async fn insert_role_permissions(
        &mut self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()>;
    /// Permissions reachable from `menu_ids` through menu-permission links.
    async fn permissions_for_menus(&mut self, menu_ids: &[i64])
    -> StoreResult<Vec<PermissionRecord>>;
    /// Increment the policy revision as part of this transaction.
    async fn bump_policy_revision(&mut self) -> StoreResult<i64>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
