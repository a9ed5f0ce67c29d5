//! In-memory implementation of the RBAC store.
//!
//! # Purpose
//! Implements [`RbacStore`] with ordered maps guarded by a single
//! `tokio::sync::RwLock`. Used for local development, tests, and deployments
//! that rebuild their state from module declarations on every boot.
//!
//! # Durability and consistency
//! - **Not durable**: roles and grants are lost on restart.
//! - Unique constraints of the relational layout are enforced in code and
//!   surface as [`StoreError::Conflict`].
//! - A transaction takes the write lock for its whole lifetime and works on a
//!   staged copy of the tables; `commit` publishes the copy, dropping the
//!   handle discards it. Ambient calls made while a transaction is open wait
//!   for it to finish.
use super::{RbacStore, RbacTx, StoreError, StoreResult};
use crate::model::{
    MenuRecord, MenuUpdate, NewMenu, PermissionRecord, Role, RoleFilter, RolePage,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Clone, Default)]
struct Tables {
    permission_seq: i64,
    menu_seq: i64,
    role_seq: i64,
    permissions: BTreeMap<i64, PermissionRecord>,
    menus: BTreeMap<i64, MenuRecord>,
    /// (menu_id, permission_id)
    menu_permissions: BTreeSet<(i64, i64)>,
    roles: BTreeMap<i64, Role>,
    /// (role_id, menu_id)
    role_menus: BTreeSet<(i64, i64)>,
    /// (role_id, permission_id)
    role_permissions: BTreeSet<(i64, i64)>,
    policy_revision: i64,
}

impl Tables {
    fn find_role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|role| role.name == name)
    }

    fn insert_role(&mut self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        if self.find_role_by_name(name).is_some() {
            return Err(StoreError::Conflict(format!("role {name} exists")));
        }
        self.role_seq += 1;
        let role = Role {
            id: self.role_seq,
            name: name.to_string(),
            tenant_id,
            created_at: Utc::now(),
        };
        self.roles.insert(role.id, role.clone());
        Ok(role)
    }

    /// Drop role-permission rows not reachable through the role's menus.
    fn prune_unreachable_grants(&mut self) -> usize {
        let reachable: BTreeSet<(i64, i64)> = self
            .role_menus
            .iter()
            .flat_map(|(role_id, menu_id)| {
                self.menu_permissions
                    .iter()
                    .filter(move |(linked_menu, _)| linked_menu == menu_id)
                    .map(move |(_, permission_id)| (*role_id, *permission_id))
            })
            .collect();
        let before = self.role_permissions.len();
        self.role_permissions.retain(|grant| reachable.contains(grant));
        before - self.role_permissions.len()
    }

    fn permissions_for_menus(&self, menu_ids: &[i64]) -> Vec<PermissionRecord> {
        let menus: BTreeSet<i64> = menu_ids.iter().copied().collect();
        let ids: BTreeSet<i64> = self
            .menu_permissions
            .iter()
            .filter(|(menu_id, _)| menus.contains(menu_id))
            .map(|(_, permission_id)| *permission_id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.permissions.get(&id).cloned())
            .collect()
    }
}

/// In-memory RBAC store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw join rows, for assertions in tests: (role_id, menu_id) and
    /// (role_id, permission_id).
    pub async fn role_links(&self) -> (Vec<(i64, i64)>, Vec<(i64, i64)>) {
        let tables = self.tables.read().await;
        (
            tables.role_menus.iter().copied().collect(),
            tables.role_permissions.iter().copied().collect(),
        )
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn find_permission(
        &self,
        path: &str,
        method: &str,
    ) -> StoreResult<Option<PermissionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .values()
            .find(|perm| perm.path == path && perm.method == method)
            .cloned())
    }

    async fn create_permission(
        &self,
        path: &str,
        method: &str,
        name: Option<&str>,
    ) -> StoreResult<PermissionRecord> {
        let mut tables = self.tables.write().await;
        if tables
            .permissions
            .values()
            .any(|perm| perm.path == path && perm.method == method)
        {
            return Err(StoreError::Conflict(format!("permission {method} {path}")));
        }
        tables.permission_seq += 1;
        let record = PermissionRecord {
            id: tables.permission_seq,
            path: path.to_string(),
            method: method.to_string(),
            name: name.map(str::to_string),
        };
        tables.permissions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn rename_permission(&self, id: i64, name: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .permissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))?;
        record.name = Some(name.to_string());
        Ok(())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.permissions.values().cloned().collect())
    }

    async fn prune_permissions(&self, keep: &[i64]) -> StoreResult<u64> {
        let keep: BTreeSet<i64> = keep.iter().copied().collect();
        let mut tables = self.tables.write().await;
        let before = tables.permissions.len();
        tables.permissions.retain(|id, _| keep.contains(id));
        let removed = (before - tables.permissions.len()) as u64;
        tables
            .menu_permissions
            .retain(|(_, permission_id)| keep.contains(permission_id));
        tables
            .role_permissions
            .retain(|(_, permission_id)| keep.contains(permission_id));
        Ok(removed)
    }

    async fn find_menu_by_number(&self, number: &str) -> StoreResult<Option<MenuRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .menus
            .values()
            .find(|menu| menu.number == number)
            .cloned())
    }

    async fn create_menu(&self, menu: NewMenu) -> StoreResult<MenuRecord> {
        let mut tables = self.tables.write().await;
        if tables.menus.values().any(|row| row.number == menu.number) {
            return Err(StoreError::Conflict(format!("menu number {}", menu.number)));
        }
        tables.menu_seq += 1;
        let record = MenuRecord {
            id: tables.menu_seq,
            number: menu.number,
            name: menu.name,
            parent_id: menu.parent_id,
            sort: menu.sort,
            is_disabled: menu.is_disabled,
        };
        tables.menus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_menu_seed(&self, id: i64, name: &str, parent_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .menus
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("menu {id}")))?;
        record.name = name.to_string();
        record.parent_id = parent_id;
        Ok(())
    }

    async fn get_menu(&self, id: i64) -> StoreResult<MenuRecord> {
        let tables = self.tables.read().await;
        tables
            .menus
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("menu {id}")))
    }

    async fn update_menu(&self, id: i64, update: &MenuUpdate) -> StoreResult<MenuRecord> {
        let mut tables = self.tables.write().await;
        let record = tables
            .menus
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("menu {id}")))?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn list_menus(&self) -> StoreResult<Vec<MenuRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.menus.values().cloned().collect())
    }

    async fn count_menus(&self, ids: &[i64]) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let distinct: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(distinct
            .iter()
            .filter(|id| tables.menus.contains_key(id))
            .count() as u64)
    }

    async fn link_menu_permission(&self, menu_id: i64, permission_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.menu_permissions.insert((menu_id, permission_id));
        Ok(())
    }

    async fn list_menu_permissions(&self) -> StoreResult<Vec<(i64, i64)>> {
        let tables = self.tables.read().await;
        Ok(tables.menu_permissions.iter().copied().collect())
    }

    async fn prune_menu_links(&self, keep: &[i64]) -> StoreResult<u64> {
        let keep: BTreeSet<i64> = keep.iter().copied().collect();
        let mut tables = self.tables.write().await;
        let before = tables.role_menus.len() + tables.menu_permissions.len();
        tables
            .role_menus
            .retain(|(_, menu_id)| keep.contains(menu_id));
        tables
            .menu_permissions
            .retain(|(menu_id, _)| keep.contains(menu_id));
        let links = before - tables.role_menus.len() - tables.menu_permissions.len();
        let grants = tables.prune_unreachable_grants();
        Ok((links + grants) as u64)
    }

    async fn permissions_for_menus(
        &self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.permissions_for_menus(menu_ids))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.find_role_by_name(name).cloned())
    }

    async fn get_role(&self, id: i64) -> StoreResult<Role> {
        let tables = self.tables.read().await;
        tables
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().cloned().collect())
    }

    async fn page_roles(&self, filter: &RoleFilter) -> StoreResult<RolePage> {
        let tables = self.tables.read().await;
        let mut matched: Vec<&Role> = tables
            .roles
            .values()
            .filter(|role| filter.matches(role))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.per_page as usize)
            .cloned()
            .collect();
        Ok(RolePage {
            items,
            total,
            page: filter.page,
            per_page: filter.per_page,
        })
    }

    async fn role_menu_ids(&self, role_id: i64) -> StoreResult<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .role_menus
            .iter()
            .filter(|(role, _)| *role == role_id)
            .map(|(_, menu_id)| *menu_id)
            .collect())
    }

    async fn role_permissions(&self, role_id: i64) -> StoreResult<Vec<PermissionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .role_permissions
            .iter()
            .filter(|(role, _)| *role == role_id)
            .filter_map(|(_, permission_id)| tables.permissions.get(permission_id).cloned())
            .collect())
    }

    async fn ensure_role(&self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        let mut tables = self.tables.write().await;
        if let Some(role) = tables.find_role_by_name(name) {
            return Ok(role.clone());
        }
        tables.insert_role(name, tenant_id)
    }

    async fn grant_all(&self, role_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        let menu_ids: Vec<i64> = tables.menus.keys().copied().collect();
        let permission_ids: Vec<i64> = tables.permissions.keys().copied().collect();
        tables
            .role_menus
            .extend(menu_ids.into_iter().map(|menu_id| (role_id, menu_id)));
        tables.role_permissions.extend(
            permission_ids
                .into_iter()
                .map(|permission_id| (role_id, permission_id)),
        );
        Ok(())
    }

    async fn policy_revision(&self) -> StoreResult<i64> {
        Ok(self.tables.read().await.policy_revision)
    }

    async fn bump_policy_revision(&self) -> StoreResult<i64> {
        let mut tables = self.tables.write().await;
        tables.policy_revision += 1;
        Ok(tables.policy_revision)
    }

    async fn begin(&self) -> StoreResult<Box<dyn RbacTx>> {
        let guard = Arc::clone(&self.tables).write_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(InMemoryTx { guard, staged }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Transaction over a staged copy of the tables.
struct InMemoryTx {
    guard: OwnedRwLockWriteGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl RbacTx for InMemoryTx {
    async fn insert_role(&mut self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        self.staged.insert_role(name, tenant_id)
    }

    async fn update_role(&mut self, id: i64, name: &str, tenant_id: i64) -> StoreResult<Role> {
        if self
            .staged
            .find_role_by_name(name)
            .is_some_and(|other| other.id != id)
        {
            return Err(StoreError::Conflict(format!("role {name} exists")));
        }
        let role = self
            .staged
            .roles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))?;
        role.name = name.to_string();
        role.tenant_id = tenant_id;
        Ok(role.clone())
    }

    async fn delete_role(&mut self, id: i64) -> StoreResult<()> {
        self.staged
            .roles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))
    }

    async fn delete_role_menus(&mut self, role_id: i64) -> StoreResult<()> {
        self.staged.role_menus.retain(|(role, _)| *role != role_id);
        Ok(())
    }

    async fn insert_role_menus(&mut self, role_id: i64, menu_ids: &[i64]) -> StoreResult<()> {
        self.staged
            .role_menus
            .extend(menu_ids.iter().map(|menu_id| (role_id, *menu_id)));
        Ok(())
    }

    async fn delete_role_permissions(&mut self, role_id: i64) -> StoreResult<()> {
        self.staged
            .role_permissions
            .retain(|(role, _)| *role != role_id);
        Ok(())
    }

    async fn insert_role_permissions(
        &mut self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        self.staged.role_permissions.extend(
            permission_ids
                .iter()
                .map(|permission_id| (role_id, *permission_id)),
        );
        Ok(())
    }

    async fn permissions_for_menus(
        &mut self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        Ok(self.staged.permissions_for_menus(menu_ids))
    }

    async fn bump_policy_revision(&mut self) -> StoreResult<i64> {
        self.staged.policy_revision += 1;
        Ok(self.staged.policy_revision)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
