//! Postgres-backed implementation of the RBAC store.
//!
//! # Purpose
//! Durable storage for permissions, menus, roles and the three join tables,
//! shared by every admin-plane instance.
//!
//! # Key invariants
//! - Unique constraints live in the schema (`migrations/`); violations map to
//!   [`StoreError::Conflict`].
//! - Link inserts use `ON CONFLICT DO NOTHING`, so re-running reconciliation
//!   or re-submitting a menu id is harmless.
//! - Cascading deletes (permission pruning, menu-link pruning, super-role
//!   grants) each run in their own transaction.
//! - `policy_revision` holds a single row; bumping it inside a role mutation
//!   is what tells the other instances to rebuild their policy engines.
//!
//! # Operational notes
//! - Migrations run at startup via `sqlx::migrate!("./migrations")`.
//! - Connection pooling/timeouts are explicit; a stuck database fails requests
//!   instead of hanging them.
//!
//! # Security notes
//! - Database URLs may contain credentials; never log `PostgresConfig::url`.
use super::{RbacStore, RbacTx, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::model::{
    MenuRecord, MenuUpdate, NewMenu, PermissionRecord, Role, RoleFilter, RolePage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// Durable RBAC store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use adminplane::config::PostgresConfig;
/// use adminplane::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbPermission {
    id: i64,
    path: String,
    method: String,
    name: Option<String>,
}

impl From<DbPermission> for PermissionRecord {
    fn from(row: DbPermission) -> Self {
        PermissionRecord {
            id: row.id,
            path: row.path,
            method: row.method,
            name: row.name,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbMenu {
    id: i64,
    number: String,
    name: String,
    parent_id: i64,
    sort: i32,
    is_disabled: bool,
}

impl From<DbMenu> for MenuRecord {
    fn from(row: DbMenu) -> Self {
        MenuRecord {
            id: row.id,
            number: row.number,
            name: row.name,
            parent_id: row.parent_id,
            sort: row.sort,
            is_disabled: row.is_disabled,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    id: i64,
    name: String,
    tenant_id: i64,
    created_at: DateTime<Utc>,
}

impl From<DbRole> for Role {
    fn from(row: DbRole) -> Self {
        Role {
            id: row.id,
            name: row.name,
            tenant_id: row.tenant_id,
            created_at: row.created_at,
        }
    }
}

const PERMISSION_COLUMNS: &str = "id, path, method, name";
const MENU_COLUMNS: &str = "id, number, name, parent_id, sort, is_disabled";
const ROLE_COLUMNS: &str = "id, name, tenant_id, created_at";

impl PostgresStore {
    /// Connect, apply migrations, and return a ready store.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), pool)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow::anyhow!("postgres connect timed out")))??;

        // Handlers assume the schema exists; fail startup otherwise.
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RbacStore for PostgresStore {
    async fn find_permission(
        &self,
        path: &str,
        method: &str,
    ) -> StoreResult<Option<PermissionRecord>> {
        let row = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permission WHERE path = $1 AND method = $2"
        ))
        .bind(path)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create_permission(
        &self,
        path: &str,
        method: &str,
        name: Option<&str>,
    ) -> StoreResult<PermissionRecord> {
        let row = sqlx::query_as::<_, DbPermission>(&format!(
            "INSERT INTO permission (path, method, name) VALUES ($1, $2, $3) \
             RETURNING {PERMISSION_COLUMNS}"
        ))
        .bind(path)
        .bind(method)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn rename_permission(&self, id: i64, name: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE permission SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("permission {id}")));
        }
        Ok(())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permission ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn prune_permissions(&self, keep: &[i64]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM menu_permission WHERE NOT (permission_id = ANY($1))")
            .bind(keep)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM role_permission WHERE NOT (permission_id = ANY($1))")
            .bind(keep)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM permission WHERE NOT (id = ANY($1))")
            .bind(keep)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }

    async fn find_menu_by_number(&self, number: &str) -> StoreResult<Option<MenuRecord>> {
        let row = sqlx::query_as::<_, DbMenu>(&format!(
            "SELECT {MENU_COLUMNS} FROM menu WHERE number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create_menu(&self, menu: NewMenu) -> StoreResult<MenuRecord> {
        let row = sqlx::query_as::<_, DbMenu>(&format!(
            "INSERT INTO menu (number, name, parent_id, sort, is_disabled) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MENU_COLUMNS}"
        ))
        .bind(&menu.number)
        .bind(&menu.name)
        .bind(menu.parent_id)
        .bind(menu.sort)
        .bind(menu.is_disabled)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_menu_seed(&self, id: i64, name: &str, parent_id: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE menu SET name = $2, parent_id = $3 WHERE id = $1")
            .bind(id)
            .bind(name)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("menu {id}")));
        }
        Ok(())
    }

    async fn get_menu(&self, id: i64) -> StoreResult<MenuRecord> {
        let row = sqlx::query_as::<_, DbMenu>(&format!(
            "SELECT {MENU_COLUMNS} FROM menu WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("menu {id}")))
    }

    async fn update_menu(&self, id: i64, update: &MenuUpdate) -> StoreResult<MenuRecord> {
        let row = sqlx::query_as::<_, DbMenu>(&format!(
            "UPDATE menu SET name = COALESCE($2, name), sort = COALESCE($3, sort), \
             is_disabled = COALESCE($4, is_disabled) WHERE id = $1 RETURNING {MENU_COLUMNS}"
        ))
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.sort)
        .bind(update.is_disabled)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("menu {id}")))
    }

    async fn list_menus(&self) -> StoreResult<Vec<MenuRecord>> {
        let rows = sqlx::query_as::<_, DbMenu>(&format!(
            "SELECT {MENU_COLUMNS} FROM menu ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_menus(&self, ids: &[i64]) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM menu WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn link_menu_permission(&self, menu_id: i64, permission_id: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO menu_permission (menu_id, permission_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(menu_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_menu_permissions(&self) -> StoreResult<Vec<(i64, i64)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT menu_id, permission_id FROM menu_permission ORDER BY menu_id, permission_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn prune_menu_links(&self, keep: &[i64]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let role_links = sqlx::query("DELETE FROM role_menu WHERE NOT (menu_id = ANY($1))")
            .bind(keep)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let permission_links =
            sqlx::query("DELETE FROM menu_permission WHERE NOT (menu_id = ANY($1))")
                .bind(keep)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        let grants = sqlx::query(PRUNE_UNREACHABLE_GRANTS)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(role_links + permission_links + grants)
    }

    async fn permissions_for_menus(
        &self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, DbPermission>(PERMISSIONS_FOR_MENUS)
            .bind(menu_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM role WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_role(&self, id: i64) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM role WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM role ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn page_roles(&self, filter: &RoleFilter) -> StoreResult<RolePage> {
        // strpos keeps the filter a literal substring match (no LIKE wildcards).
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM role WHERE ($1::text IS NULL OR strpos(name, $1) > 0)",
        )
        .bind(filter.name.as_deref())
        .fetch_one(&self.pool)
        .await?;
        let rows = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM role \
             WHERE ($1::text IS NULL OR strpos(name, $1) > 0) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(filter.name.as_deref())
        .bind(i64::from(filter.per_page))
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(RolePage {
            items: rows.into_iter().map(Into::into).collect(),
            total: total.max(0) as u64,
            page: filter.page,
            per_page: filter.per_page,
        })
    }

    async fn role_menu_ids(&self, role_id: i64) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT menu_id FROM role_menu WHERE role_id = $1 ORDER BY menu_id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn role_permissions(&self, role_id: i64) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, DbPermission>(
            "SELECT p.id, p.path, p.method, p.name FROM permission p \
             JOIN role_permission rp ON rp.permission_id = p.id \
             WHERE rp.role_id = $1 ORDER BY p.id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ensure_role(&self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        sqlx::query(
            "INSERT INTO role (name, tenant_id) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM role WHERE name = $1"
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn grant_all(&self, role_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO role_menu (role_id, menu_id) SELECT $1, id FROM menu \
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO role_permission (role_id, permission_id) SELECT $1, id FROM permission \
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn policy_revision(&self) -> StoreResult<i64> {
        let revision = sqlx::query_scalar::<_, i64>(
            "SELECT revision FROM policy_revision WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(revision)
    }

    async fn bump_policy_revision(&self) -> StoreResult<i64> {
        let revision = sqlx::query_scalar::<_, i64>(BUMP_POLICY_REVISION)
            .fetch_one(&self.pool)
            .await?;
        Ok(revision)
    }

    async fn begin(&self) -> StoreResult<Box<dyn RbacTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

const BUMP_POLICY_REVISION: &str =
    "UPDATE policy_revision SET revision = revision + 1 WHERE id = 1 RETURNING revision";

const PRUNE_UNREACHABLE_GRANTS: &str = "DELETE FROM role_permission rp WHERE NOT EXISTS (\
     SELECT 1 FROM role_menu rm JOIN menu_permission mp ON mp.menu_id = rm.menu_id \
     WHERE rm.role_id = rp.role_id AND mp.permission_id = rp.permission_id)";

const PERMISSIONS_FOR_MENUS: &str = "SELECT DISTINCT p.id, p.path, p.method, p.name \
     FROM permission p JOIN menu_permission mp ON mp.permission_id = p.id \
     WHERE mp.menu_id = ANY($1) ORDER BY p.id";

/// Caller-owned transaction; sqlx rolls back on drop.
struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RbacTx for PostgresTx {
    async fn insert_role(&mut self, name: &str, tenant_id: i64) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "INSERT INTO role (name, tenant_id) VALUES ($1, $2) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(name)
        .bind(tenant_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn update_role(&mut self, id: i64, name: &str, tenant_id: i64) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "UPDATE role SET name = $2, tenant_id = $3 WHERE id = $1 RETURNING {ROLE_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))
    }

    async fn delete_role(&mut self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM role WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    async fn delete_role_menus(&mut self, role_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_menu WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_role_menus(&mut self, role_id: i64, menu_ids: &[i64]) -> StoreResult<()> {
        if menu_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO role_menu (role_id, menu_id) SELECT $1, UNNEST($2::bigint[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(menu_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_role_permissions(&mut self, role_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permission WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_role_permissions(
        &mut self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        if permission_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO role_permission (role_id, permission_id) \
             SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn permissions_for_menus(
        &mut self,
        menu_ids: &[i64],
    ) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, DbPermission>(PERMISSIONS_FOR_MENUS)
            .bind(menu_ids)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn bump_policy_revision(&mut self) -> StoreResult<i64> {
        let revision = sqlx::query_scalar::<_, i64>(BUMP_POLICY_REVISION)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(revision)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
