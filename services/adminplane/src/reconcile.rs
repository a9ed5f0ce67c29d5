//! Startup reconciliation.
//!
//! # Purpose
//! Derives the permission and menu tables from what is actually running: the
//! live route table and the menus declared by registered modules. Runs once,
//! after every module has bound its routes.
//!
//! # Steps
//! 1. Discover a permission for every admin route, creating missing rows.
//! 2. Prune permissions no longer backed by a route (cascades to links).
//! 3. Upsert declared menus by `number`, concurrently per subtree, and link
//!    their declared permissions.
//! 4. Prune role-menu and menu-permission links of menus not declared this
//!    run, and the role grants they carried. Skipped when any declared menu
//!    failed to upsert in step 3, since its id is then unknown.
//! 5. Grant the super role every stored menu and permission, then bump the
//!    policy revision so other instances rebuild.
//! 6. Rebuild every role's policy rules from relational state.
//!
//! Steps 1 and 2 are fatal on storage errors. Steps 3 to 6 log, count, and
//! carry on.
use crate::config::ReconcileConfig;
use crate::model::{MenuNode, NewMenu, PermissionDeclaration};
use crate::module::{MenuRegistry, RouteTable};
use crate::service::RoleService;
use crate::store::{RbacStore, StoreError, StoreResult};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("permission discovery failed for {method} {path}")]
    Discovery {
        method: String,
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("stale permission pruning failed")]
    Prune(#[source] StoreError),
}

/// Counts gathered by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub permissions_live: usize,
    pub permissions_created: usize,
    pub permissions_pruned: u64,
    pub menus_upserted: usize,
    pub menu_failures: usize,
    pub links_pruned: u64,
    pub link_pruning_skipped: bool,
    pub super_role_id: Option<i64>,
    pub policies_synced: usize,
}

pub struct Reconciler {
    store: Arc<dyn RbacStore>,
    routes: RouteTable,
    menus: Arc<MenuRegistry>,
    roles: Arc<RoleService>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RbacStore>,
        routes: RouteTable,
        menus: Arc<MenuRegistry>,
        roles: Arc<RoleService>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            routes,
            menus,
            roles,
            config,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let keep = self.discover_permissions(&mut report).await?;
        report.permissions_live = keep.len();
        if keep.is_empty() {
            tracing::warn!(
                prefix = %self.config.admin_prefix,
                "no admin routes bound; every stored permission will be pruned"
            );
        }
        report.permissions_pruned = self
            .store
            .prune_permissions(&keep)
            .await
            .map_err(ReconcileError::Prune)?;

        let outcome = self.upsert_menus().await;
        report.menus_upserted = outcome.menu_ids.len();
        report.menu_failures = outcome.failures + outcome.skipped;

        if outcome.failures > 0 {
            report.link_pruning_skipped = true;
            record_row_failure("prune_menu_links");
            tracing::warn!(
                failures = outcome.failures,
                "menu upserts failed; stale menu links kept until the next pass"
            );
        } else {
            match self.store.prune_menu_links(&outcome.menu_ids).await {
                Ok(removed) => report.links_pruned = removed,
                Err(err) => {
                    record_row_failure("prune_menu_links");
                    tracing::error!(error = %err, "menu link pruning failed");
                }
            }
        }

        report.super_role_id = self.bind_super_role().await;
        if let Err(err) = self.store.bump_policy_revision().await {
            record_row_failure("policy_revision");
            tracing::error!(error = %err, "policy revision bump failed");
        }

        match self.roles.resync_policies().await {
            Ok(synced) => report.policies_synced = synced,
            Err(err) => {
                record_row_failure("policy_resync");
                tracing::error!(error = %err, "policy resync failed");
            }
        }

        self.publish_gauges().await;
        tracing::info!(
            permissions = report.permissions_live,
            created = report.permissions_created,
            pruned = report.permissions_pruned,
            menus = report.menus_upserted,
            menu_failures = report.menu_failures,
            links_pruned = report.links_pruned,
            link_pruning_skipped = report.link_pruning_skipped,
            policies = report.policies_synced,
            "reconciliation complete"
        );
        Ok(report)
    }

    async fn discover_permissions(
        &self,
        report: &mut ReconcileReport,
    ) -> Result<Vec<i64>, ReconcileError> {
        let routes: BTreeSet<(String, String)> = self
            .routes
            .routes_with_prefix(&self.config.admin_prefix)
            .into_iter()
            .map(|route| (route.path, route.method))
            .collect();
        let mut keep = Vec::with_capacity(routes.len());
        for (path, method) in routes {
            let found = self
                .find_or_create_permission(&path, &method)
                .await
                .map_err(|source| ReconcileError::Discovery {
                    method: method.clone(),
                    path: path.clone(),
                    source,
                })?;
            if found.1 {
                report.permissions_created += 1;
                tracing::debug!(method = %method, path = %path, "permission created");
            }
            keep.push(found.0);
        }
        Ok(keep)
    }

    /// Returns the permission id and whether it was created.
    async fn find_or_create_permission(
        &self,
        path: &str,
        method: &str,
    ) -> StoreResult<(i64, bool)> {
        if let Some(existing) = self.store.find_permission(path, method).await? {
            return Ok((existing.id, false));
        }
        match self.store.create_permission(path, method, None).await {
            Ok(created) => Ok((created.id, true)),
            // Another instance created it between the lookup and the insert.
            Err(StoreError::Conflict(_)) => self
                .store
                .find_permission(path, method)
                .await?
                .map(|existing| (existing.id, false))
                .ok_or_else(|| StoreError::NotFound(format!("permission {method} {path}"))),
            Err(err) => Err(err),
        }
    }

    async fn upsert_menus(&self) -> MenuUpsertOutcome {
        let mut roots = self.menus.all_menus();
        let skipped = drop_duplicate_numbers(&mut roots);
        let mut failures = 0;

        let (collector, mut results) = mpsc::unbounded_channel();
        let ctx = Arc::new(MenuUpsertContext {
            store: Arc::clone(&self.store),
            permits: Semaphore::new(self.config.menu_upsert_concurrency.max(1)),
            collector,
        });
        let mut tasks = JoinSet::new();
        for root in roots {
            tasks.spawn(upsert_subtree(Arc::clone(&ctx), root, 0));
        }
        // The channel closes once every task has dropped its context handle.
        drop(ctx);

        let mut menu_ids = Vec::new();
        while let Some(result) = results.recv().await {
            match result {
                MenuUpsertResult::Upserted(id) => menu_ids.push(id),
                MenuUpsertResult::Failed(count) => failures += count,
            }
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "menu upsert task panicked");
            }
        }
        menu_ids.sort_unstable();
        menu_ids.dedup();
        MenuUpsertOutcome {
            menu_ids,
            failures,
            skipped,
        }
    }

    async fn bind_super_role(&self) -> Option<i64> {
        let role = match self
            .store
            .ensure_role(&self.config.super_role, self.config.default_tenant_id)
            .await
        {
            Ok(role) => role,
            Err(err) => {
                record_row_failure("super_role");
                tracing::error!(
                    role = %self.config.super_role,
                    error = %err,
                    "super role seeding failed"
                );
                return None;
            }
        };
        if let Err(err) = self.store.grant_all(role.id).await {
            record_row_failure("super_role");
            tracing::error!(role = %role.name, error = %err, "super role grant failed");
        }
        Some(role.id)
    }

    async fn publish_gauges(&self) {
        if let Ok(permissions) = self.store.list_permissions().await {
            metrics::gauge!("adminplane_permissions_total").set(permissions.len() as f64);
        }
        if let Ok(menus) = self.store.list_menus().await {
            metrics::gauge!("adminplane_menus_total").set(menus.len() as f64);
        }
    }
}

/// Drop roots whose `number` (or a descendant's) was already declared by an
/// earlier provider. Returns how many nodes were dropped.
fn drop_duplicate_numbers(roots: &mut Vec<MenuNode>) -> usize {
    fn collect<'a>(node: &'a MenuNode, numbers: &mut Vec<&'a str>) {
        numbers.push(&node.number);
        for child in &node.children {
            collect(child, numbers);
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut dropped = 0;
    roots.retain(|root| {
        let mut numbers = Vec::new();
        collect(root, &mut numbers);
        let unique: HashSet<&str> = numbers.iter().copied().collect();
        let clash =
            unique.len() != numbers.len() || numbers.iter().any(|n| seen.contains(*n));
        if clash {
            record_row_failure("menu_upsert");
            tracing::error!(
                menu = %root.number,
                "duplicate menu number declared; subtree skipped"
            );
            dropped += root.node_count();
            return false;
        }
        seen.extend(numbers.into_iter().map(str::to_string));
        true
    });
    dropped
}

struct MenuUpsertOutcome {
    menu_ids: Vec<i64>,
    /// Nodes lost to storage errors.
    failures: usize,
    /// Nodes dropped for reusing a `number`.
    skipped: usize,
}

enum MenuUpsertResult {
    Upserted(i64),
    /// Nodes that could not be placed (the failed node and its subtree).
    Failed(usize),
}

struct MenuUpsertContext {
    store: Arc<dyn RbacStore>,
    permits: Semaphore,
    collector: mpsc::UnboundedSender<MenuUpsertResult>,
}

impl MenuUpsertContext {
    fn send(&self, result: MenuUpsertResult) {
        // The receiver outlives every task.
        let _ = self.collector.send(result);
    }

    async fn upsert_node(&self, node: &MenuNode, parent_id: i64) -> StoreResult<i64> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| StoreError::Unexpected(err.into()))?;
        let id = match self.store.find_menu_by_number(&node.number).await? {
            Some(existing) => {
                if existing.name != node.name || existing.parent_id != parent_id {
                    self.store
                        .update_menu_seed(existing.id, &node.name, parent_id)
                        .await?;
                }
                existing.id
            }
            None => self.store.create_menu(NewMenu::from_node(node, parent_id)).await?.id,
        };
        for declaration in &node.permissions {
            if let Err(err) = self.link_permission(id, declaration).await {
                record_row_failure("menu_permission");
                tracing::error!(
                    menu = %node.number,
                    method = %declaration.method,
                    path = %declaration.path,
                    error = %err,
                    "menu permission link failed"
                );
            }
        }
        Ok(id)
    }

    async fn link_permission(
        &self,
        menu_id: i64,
        declaration: &PermissionDeclaration,
    ) -> StoreResult<()> {
        let Some(record) = self
            .store
            .find_permission(&declaration.path, &declaration.method)
            .await?
        else {
            return Err(StoreError::NotFound(format!(
                "no route bound for {} {}",
                declaration.method, declaration.path
            )));
        };
        if let Some(name) = declaration.rename_for(&record) {
            self.store.rename_permission(record.id, name).await?;
        }
        self.store.link_menu_permission(menu_id, record.id).await
    }
}

/// Upsert `node`, then its children in parallel under the resolved id.
fn upsert_subtree(
    ctx: Arc<MenuUpsertContext>,
    node: MenuNode,
    parent_id: i64,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let id = match ctx.upsert_node(&node, parent_id).await {
            Ok(id) => id,
            Err(err) => {
                record_row_failure("menu_upsert");
                tracing::error!(
                    menu = %node.number,
                    error = %err,
                    "menu upsert failed; subtree skipped"
                );
                ctx.send(MenuUpsertResult::Failed(node.node_count()));
                return;
            }
        };
        ctx.send(MenuUpsertResult::Upserted(id));

        let mut children = JoinSet::new();
        for child in node.children {
            children.spawn(upsert_subtree(Arc::clone(&ctx), child, id));
        }
        drop(ctx);
        while let Some(joined) = children.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "menu upsert task panicked");
            }
        }
    })
}

fn record_row_failure(step: &'static str) {
    metrics::counter!("adminplane_reconcile_row_failures_total", "step" => step).increment(1);
}

/// Periodically rebuild policy rules from relational state.
pub fn spawn_policy_resync_task(roles: Arc<RoleService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; startup already resynced.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match roles.resync_policies().await {
                Ok(synced) => tracing::debug!(synced, "periodic policy resync"),
                Err(err) => tracing::warn!(error = %err, "periodic policy resync failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use homework_authz::CasbinPolicyEngine;

    fn deep_tree() -> MenuNode {
        MenuNode::new("root", "Root").child(
            MenuNode::new("a", "A")
                .child(MenuNode::new("a1", "A1").child(MenuNode::new("a1x", "A1x")))
                .child(MenuNode::new("a2", "A2")),
        )
        .child(MenuNode::new("b", "B").permission(PermissionDeclaration::named(
            "GET",
            "/admin/b",
            "Browse B",
        )))
    }

    async fn reconciler(
        store: InMemoryStore,
        menus: Arc<MenuRegistry>,
        routes: RouteTable,
    ) -> Reconciler {
        let policy = Arc::new(CasbinPolicyEngine::new().await.expect("engine"));
        let store: Arc<dyn RbacStore> = Arc::new(store);
        let roles = Arc::new(RoleService::new(store.clone(), policy, "super_admin", 1));
        let config = ReconcileConfig {
            menu_upsert_concurrency: 2,
            ..ReconcileConfig::default()
        };
        Reconciler::new(store, routes, menus, roles, config)
    }

    fn routes(pairs: &[(&str, &str)]) -> RouteTable {
        let table = RouteTable::new();
        let mut groups = crate::module::RouteGroups::new(table.clone(), "/api", "/admin");
        for (method, path) in pairs {
            let route = axum::routing::get(|| async { "ok" });
            groups.admin_auth.bind(
                method.parse().expect("method"),
                path,
                route,
            );
        }
        table
    }

    #[tokio::test]
    async fn deep_trees_keep_parent_links_and_rename_permissions() {
        let store = InMemoryStore::new();
        let menus = Arc::new(MenuRegistry::new());
        menus.register_provider("tree", Arc::new(|| vec![deep_tree()]));
        let reconciler = reconciler(store.clone(), menus, routes(&[("GET", "/b")])).await;

        let report = reconciler.run().await.expect("run");
        assert_eq!(report.menus_upserted, 6);
        assert_eq!(report.menu_failures, 0);

        let stored = store.list_menus().await.expect("menus");
        let by_number = |number: &str| {
            stored
                .iter()
                .find(|menu| menu.number == number)
                .cloned()
                .expect("menu")
        };
        assert_eq!(by_number("root").parent_id, 0);
        assert_eq!(by_number("a").parent_id, by_number("root").id);
        assert_eq!(by_number("a1x").parent_id, by_number("a1").id);

        let permission = store
            .find_permission("/admin/b", "GET")
            .await
            .expect("lookup")
            .expect("permission");
        assert_eq!(permission.name.as_deref(), Some("Browse B"));
        assert_eq!(
            store.list_menu_permissions().await.expect("links"),
            vec![(by_number("b").id, permission.id)]
        );
    }

    #[tokio::test]
    async fn duplicate_numbers_across_providers_are_skipped() {
        let store = InMemoryStore::new();
        let menus = Arc::new(MenuRegistry::new());
        menus.register_provider("first", Arc::new(|| vec![MenuNode::new("m1", "First")]));
        menus.register_provider(
            "second",
            Arc::new(|| vec![MenuNode::new("m1", "Second").child(MenuNode::new("m2", "Child"))]),
        );
        let reconciler = reconciler(store.clone(), menus, routes(&[])).await;

        let report = reconciler.run().await.expect("run");
        assert_eq!(report.menus_upserted, 1);
        assert_eq!(report.menu_failures, 2);
        let stored = store.list_menus().await.expect("menus");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "First");
    }

    #[tokio::test]
    async fn undeclared_permission_does_not_stop_the_tree() {
        let store = InMemoryStore::new();
        let menus = Arc::new(MenuRegistry::new());
        menus.register_provider(
            "tree",
            Arc::new(|| {
                vec![
                    MenuNode::new("m1", "M1")
                        .permission(PermissionDeclaration::new("GET", "/admin/missing"))
                        .child(MenuNode::new("m2", "M2")),
                ]
            }),
        );
        let reconciler = reconciler(store.clone(), menus, routes(&[])).await;

        let report = reconciler.run().await.expect("run");
        assert_eq!(report.menus_upserted, 2);
        assert!(store.list_menu_permissions().await.expect("links").is_empty());
    }

    #[tokio::test]
    async fn super_role_receives_every_menu_and_permission() {
        let store = InMemoryStore::new();
        let menus = Arc::new(MenuRegistry::new());
        menus.register_provider("tree", Arc::new(|| vec![deep_tree()]));
        let reconciler = reconciler(
            store.clone(),
            menus,
            routes(&[("GET", "/b"), ("POST", "/c")]),
        )
        .await;

        let report = reconciler.run().await.expect("run");
        let super_id = report.super_role_id.expect("super role");
        assert_eq!(store.role_menu_ids(super_id).await.expect("menus").len(), 6);
        assert_eq!(
            store.role_permissions(super_id).await.expect("perms").len(),
            2
        );
    }
}
