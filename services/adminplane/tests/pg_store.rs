#![cfg(feature = "pg-tests")]

mod common;

use adminplane::app::{AppState, bootstrap, default_modules};
use adminplane::config::PostgresConfig;
use adminplane::model::NewMenu;
use adminplane::service::RoleInput;
use adminplane::store::postgres::PostgresStore;
use adminplane::store::{RbacStore, RbacTx, StoreError};
use common::{jwt_config, reconcile_config};
use homework_authz::{CasbinPolicyEngine, PolicyEngine};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

static PG_STORE: tokio::sync::OnceCell<Arc<PostgresStore>> = tokio::sync::OnceCell::const_new();

async fn reset_postgres(url: &str) -> Result<(), sqlx::Error> {
    let pool = match tokio::time::timeout(
        std::time::Duration::from_secs(2),
        PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect(url),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(sqlx::Error::PoolTimedOut),
    };
    sqlx::query(
        "TRUNCATE role_permission, role_menu, menu_permission, role, menu, permission \
         RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .map(|_| ())
}

/// Connects (running migrations) once, then truncates every table.
async fn pg_store() -> Option<Arc<PostgresStore>> {
    let url = match std::env::var("ADMINPLANE_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set ADMINPLANE_TEST_DATABASE_URL or DATABASE_URL");
            return None;
        }
    };
    let pg_cfg = PostgresConfig {
        url: url.clone(),
        max_connections: 5,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    };
    let store = match PG_STORE
        .get_or_try_init(|| async {
            let store = PostgresStore::connect(&pg_cfg).await?;
            Ok::<_, StoreError>(Arc::new(store))
        })
        .await
    {
        Ok(store) => Arc::clone(store),
        Err(err) => {
            eprintln!("skipping pg-tests: connect postgres store failed: {err}");
            return None;
        }
    };
    if let Err(err) = reset_postgres(&url).await {
        eprintln!("skipping pg-tests: cannot reset postgres: {err}");
        return None;
    }
    Some(store)
}

#[tokio::test]
#[serial]
async fn pg_bootstrap_is_idempotent_and_grants_super_role() {
    let Some(store) = pg_store().await else {
        return;
    };
    let policy = Arc::new(CasbinPolicyEngine::new().await.expect("engine"));
    let state = AppState::new(store.clone(), policy.clone(), jwt_config(), &reconcile_config());
    let first = bootstrap(state, &reconcile_config(), &default_modules())
        .await
        .expect("first pass");
    assert!(first.report.permissions_created > 0);

    let permissions = store.list_permissions().await.expect("permissions");
    let menus = store.list_menus().await.expect("menus");
    let links = store.list_menu_permissions().await.expect("links");

    let state = AppState::new(store.clone(), policy.clone(), jwt_config(), &reconcile_config());
    let second = bootstrap(state, &reconcile_config(), &default_modules())
        .await
        .expect("second pass");
    assert_eq!(second.report.permissions_created, 0);
    assert_eq!(second.report.permissions_pruned, 0);
    assert_eq!(store.list_permissions().await.expect("permissions"), permissions);
    assert_eq!(store.list_menus().await.expect("menus"), menus);
    assert_eq!(store.list_menu_permissions().await.expect("links"), links);

    let super_id = second.report.super_role_id.expect("super role");
    assert_eq!(
        store.role_permissions(super_id).await.expect("grants").len(),
        permissions.len()
    );
    assert!(
        policy
            .enforce("role_super_admin", "1", "/admin/roles/3", "DELETE")
            .await
            .expect("enforce")
    );
}

#[tokio::test]
#[serial]
async fn pg_role_lifecycle_keeps_projection() {
    let Some(store) = pg_store().await else {
        return;
    };
    let policy = Arc::new(CasbinPolicyEngine::new().await.expect("engine"));
    let state = AppState::new(store.clone(), policy.clone(), jwt_config(), &reconcile_config());
    bootstrap(state.clone(), &reconcile_config(), &default_modules())
        .await
        .expect("bootstrap");
    let menu = store
        .find_menu_by_number("menu-management")
        .await
        .expect("lookup")
        .expect("menu");

    let role = state
        .roles
        .create_role_with_menus(RoleInput {
            name: "ops".to_string(),
            tenant_id: Some(3),
            menu_ids: vec![menu.id, menu.id],
        })
        .await
        .expect("create");
    assert_eq!(store.role_menu_ids(role.id).await.expect("menus"), vec![menu.id]);
    let granted = store.role_permissions(role.id).await.expect("permissions");
    let reachable = store.permissions_for_menus(&[menu.id]).await.expect("reachable");
    assert_eq!(granted, reachable);
    assert_eq!(
        policy
            .rules_for_subject("role_ops", "3")
            .await
            .expect("rules")
            .len(),
        2
    );

    let err = state
        .roles
        .create_role_with_menus(RoleInput {
            name: "ops".to_string(),
            tenant_id: None,
            menu_ids: Vec::new(),
        })
        .await
        .expect_err("duplicate");
    assert!(matches!(err, adminplane::service::RoleError::Duplicate(_)));

    state.roles.delete_role(role.id).await.expect("delete");
    assert!(store.role_permissions(role.id).await.expect("grants").is_empty());
    assert!(store.find_role_by_name("ops").await.expect("lookup").is_none());
}

#[tokio::test]
#[serial]
async fn pg_dropped_transaction_rolls_back() {
    let Some(store) = pg_store().await else {
        return;
    };
    let menu = store
        .create_menu(NewMenu {
            number: "solo".to_string(),
            name: "Solo".to_string(),
            parent_id: 0,
            sort: 0,
            is_disabled: false,
        })
        .await
        .expect("menu");
    {
        let mut tx = store.begin().await.expect("begin");
        let role = tx.insert_role("ghost", 1).await.expect("insert");
        tx.insert_role_menus(role.id, &[menu.id]).await.expect("links");
    }
    assert!(store.find_role_by_name("ghost").await.expect("lookup").is_none());
    assert!(store.list_roles().await.expect("roles").is_empty());
}

#[tokio::test]
#[serial]
async fn pg_pruning_cascades_to_links() {
    let Some(store) = pg_store().await else {
        return;
    };
    let keep = store
        .create_permission("/admin/keep", "GET", None)
        .await
        .expect("keep");
    let stale = store
        .create_permission("/admin/stale", "GET", Some("Stale"))
        .await
        .expect("stale");
    let menu = store
        .create_menu(NewMenu {
            number: "ops".to_string(),
            name: "Ops".to_string(),
            parent_id: 0,
            sort: 0,
            is_disabled: false,
        })
        .await
        .expect("menu");
    store.link_menu_permission(menu.id, keep.id).await.expect("link");
    store.link_menu_permission(menu.id, stale.id).await.expect("link");
    let role = store.ensure_role("ops", 1).await.expect("role");
    store.grant_all(role.id).await.expect("grant");

    let removed = store.prune_permissions(&[keep.id]).await.expect("prune");
    assert_eq!(removed, 1);
    assert_eq!(
        store.list_menu_permissions().await.expect("links"),
        vec![(menu.id, keep.id)]
    );
    let granted: Vec<i64> = store
        .role_permissions(role.id)
        .await
        .expect("grants")
        .into_iter()
        .map(|permission| permission.id)
        .collect();
    assert_eq!(granted, vec![keep.id]);
    assert!(matches!(
        store.create_permission("/admin/keep", "GET", None).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
#[serial]
async fn pg_menu_link_pruning_revokes_unreachable_grants() {
    let Some(store) = pg_store().await else {
        return;
    };
    let shared = store
        .create_permission("/admin/shared", "GET", None)
        .await
        .expect("shared");
    let dropped = store
        .create_permission("/admin/dropped", "POST", None)
        .await
        .expect("dropped");
    let mut menus = Vec::new();
    for number in ["kept", "gone"] {
        let menu = store
            .create_menu(NewMenu {
                number: number.to_string(),
                name: number.to_string(),
                parent_id: 0,
                sort: 0,
                is_disabled: false,
            })
            .await
            .expect("menu");
        store.link_menu_permission(menu.id, shared.id).await.expect("link");
        menus.push(menu);
    }
    let (kept, gone) = (&menus[0], &menus[1]);
    store.link_menu_permission(gone.id, dropped.id).await.expect("link");

    let revision = store.policy_revision().await.expect("revision");
    let mut tx = store.begin().await.expect("begin");
    let role = tx.insert_role("editor", 1).await.expect("role");
    tx.insert_role_menus(role.id, &[kept.id, gone.id]).await.expect("menus");
    tx.insert_role_permissions(role.id, &[shared.id, dropped.id])
        .await
        .expect("grants");
    assert_eq!(tx.bump_policy_revision().await.expect("bump"), revision + 1);
    tx.commit().await.expect("commit");

    store.prune_menu_links(&[kept.id]).await.expect("prune");
    assert_eq!(store.role_menu_ids(role.id).await.expect("menus"), vec![kept.id]);
    let granted: Vec<i64> = store
        .role_permissions(role.id)
        .await
        .expect("grants")
        .into_iter()
        .map(|permission| permission.id)
        .collect();
    assert_eq!(granted, vec![shared.id]);
    assert_eq!(store.policy_revision().await.expect("revision"), revision + 1);
}
