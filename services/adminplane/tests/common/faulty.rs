//! Store wrapper that fails selected calls on demand.
use adminplane::model::{
    MenuRecord, MenuUpdate, NewMenu, PermissionRecord, Role, RoleFilter, RolePage,
};
use adminplane::store::memory::InMemoryStore;
use adminplane::store::{RbacStore, RbacTx, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn injected(what: &str) -> StoreError {
    StoreError::Unexpected(anyhow::anyhow!("injected {what} failure"))
}

#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_permission_links: Arc<AtomicBool>,
    fail_menu_numbers: Arc<Mutex<BTreeSet<String>>>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Transactions begun from now on fail `insert_role_permissions`.
    pub fn fail_permission_links(&self, fail: bool) {
        self.fail_permission_links.store(fail, Ordering::SeqCst);
    }

    /// Lookups of menu `number` fail until cleared.
    pub fn fail_menu(&self, number: &str) {
        if let Ok(mut numbers) = self.fail_menu_numbers.lock() {
            numbers.insert(number.to_string());
        }
    }

    pub fn clear_menu_failures(&self) {
        if let Ok(mut numbers) = self.fail_menu_numbers.lock() {
            numbers.clear();
        }
    }

    fn menu_fails(&self, number: &str) -> bool {
        self.fail_menu_numbers
            .lock()
            .map(|numbers| numbers.contains(number))
            .unwrap_or(false)
    }
}

struct FaultyTx {
    inner: Box<dyn RbacTx>,
    fail_permission_links: bool,
}

#[async_trait]
impl RbacTx for FaultyTx {
    async fn insert_role(&mut self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        self.inner.insert_role(name, tenant_id).await
    }

    async fn update_role(&mut self, id: i64, name: &str, tenant_id: i64) -> StoreResult<Role> {
        self.inner.update_role(id, name, tenant_id).await
    }

    async fn delete_role(&mut self, id: i64) -> StoreResult<()> {
        self.inner.delete_role(id).await
    }

    async fn delete_role_menus(&mut self, role_id: i64) -> StoreResult<()> {
        self.inner.delete_role_menus(role_id).await
    }

    async fn insert_role_menus(&mut self, role_id: i64, menu_ids: &[i64]) -> StoreResult<()> {
        self.inner.insert_role_menus(role_id, menu_ids).await
    }

    async fn delete_role_permissions(&mut self, role_id: i64) -> StoreResult<()> {
        self.inner.delete_role_permissions(role_id).await
    }

    async fn insert_role_permissions(
        &mut self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        if self.fail_permission_links {
            return Err(injected("role_permission"));
        }
        self.inner
            .insert_role_permissions(role_id, permission_ids)
            .await
    }

    async fn permissions_for_menus(
        &mut self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        self.inner.permissions_for_menus(menu_ids).await
    }

    async fn bump_policy_revision(&mut self) -> StoreResult<i64> {
        self.inner.bump_policy_revision().await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }
}

#[async_trait]
impl RbacStore for FaultyStore {
    async fn find_permission(
        &self,
        path: &str,
        method: &str,
    ) -> StoreResult<Option<PermissionRecord>> {
        self.inner.find_permission(path, method).await
    }

    async fn create_permission(
        &self,
        path: &str,
        method: &str,
        name: Option<&str>,
    ) -> StoreResult<PermissionRecord> {
        self.inner.create_permission(path, method, name).await
    }

    async fn rename_permission(&self, id: i64, name: &str) -> StoreResult<()> {
        self.inner.rename_permission(id, name).await
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>> {
        self.inner.list_permissions().await
    }

    async fn prune_permissions(&self, keep: &[i64]) -> StoreResult<u64> {
        self.inner.prune_permissions(keep).await
    }

    async fn find_menu_by_number(&self, number: &str) -> StoreResult<Option<MenuRecord>> {
        if self.menu_fails(number) {
            return Err(injected("menu lookup"));
        }
        self.inner.find_menu_by_number(number).await
    }

    async fn get_menu(&self, id: i64) -> StoreResult<MenuRecord> {
        self.inner.get_menu(id).await
    }

    async fn create_menu(&self, menu: NewMenu) -> StoreResult<MenuRecord> {
        self.inner.create_menu(menu).await
    }

    async fn update_menu_seed(&self, id: i64, name: &str, parent_id: i64) -> StoreResult<()> {
        self.inner.update_menu_seed(id, name, parent_id).await
    }

    async fn update_menu(&self, id: i64, update: &MenuUpdate) -> StoreResult<MenuRecord> {
        self.inner.update_menu(id, update).await
    }

    async fn list_menus(&self) -> StoreResult<Vec<MenuRecord>> {
        self.inner.list_menus().await
    }

    async fn count_menus(&self, ids: &[i64]) -> StoreResult<u64> {
        self.inner.count_menus(ids).await
    }

    async fn link_menu_permission(&self, menu_id: i64, permission_id: i64) -> StoreResult<()> {
        self.inner.link_menu_permission(menu_id, permission_id).await
    }

    async fn list_menu_permissions(&self) -> StoreResult<Vec<(i64, i64)>> {
        self.inner.list_menu_permissions().await
    }

    async fn prune_menu_links(&self, keep: &[i64]) -> StoreResult<u64> {
        self.inner.prune_menu_links(keep).await
    }

    async fn permissions_for_menus(
        &self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        self.inner.permissions_for_menus(menu_ids).await
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        self.inner.find_role_by_name(name).await
    }

    async fn get_role(&self, id: i64) -> StoreResult<Role> {
        self.inner.get_role(id).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.inner.list_roles().await
    }

    async fn page_roles(&self, filter: &RoleFilter) -> StoreResult<RolePage> {
        self.inner.page_roles(filter).await
    }

    async fn role_menu_ids(&self, role_id: i64) -> StoreResult<Vec<i64>> {
        self.inner.role_menu_ids(role_id).await
    }

    async fn role_permissions(&self, role_id: i64) -> StoreResult<Vec<PermissionRecord>> {
        self.inner.role_permissions(role_id).await
    }

    async fn ensure_role(&self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        self.inner.ensure_role(name, tenant_id).await
    }

    async fn grant_all(&self, role_id: i64) -> StoreResult<()> {
        self.inner.grant_all(role_id).await
    }

    async fn policy_revision(&self) -> StoreResult<i64> {
        self.inner.policy_revision().await
    }

    async fn bump_policy_revision(&self) -> StoreResult<i64> {
        self.inner.bump_policy_revision().await
    }

    async fn begin(&self) -> StoreResult<Box<dyn RbacTx>> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            fail_permission_links: self.fail_permission_links.load(Ordering::SeqCst),
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "faulty-memory"
    }
}
