mod common;

use adminplane::app::bootstrap;
use adminplane::model::{MenuNode, PermissionDeclaration, RoleFilter};
use adminplane::service::{RoleError, RoleInput, RoleService};
use adminplane::store::memory::InMemoryStore;
use adminplane::store::RbacStore;
use async_trait::async_trait;
use common::faulty::FaultyStore;
use common::{Harness, empty_registry, harness, menu_id, reconcile_config, register_stub};
use homework_authz::{AuthzError, AuthzResult, PolicyEngine, PolicyRule};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Boots `m1` (linked to GET /admin/x and GET /admin/x/:id) and `m2` (no
/// permissions).
async fn seeded() -> (Harness, i64, i64) {
    let h = harness().await;
    let registry = empty_registry();
    register_stub(
        &registry,
        "m1",
        vec![("GET", "/x"), ("GET", "/x/:id")],
        Some(vec![
            MenuNode::new("m1", "M1")
                .permission(PermissionDeclaration::new("GET", "/admin/x"))
                .permission(PermissionDeclaration::new("GET", "/admin/x/:id")),
        ]),
    );
    register_stub(&registry, "m2", Vec::new(), Some(vec![MenuNode::new("m2", "M2")]));
    bootstrap(h.state.clone(), &reconcile_config(), &registry)
        .await
        .expect("bootstrap");
    let m1 = menu_id(&h.store, "m1").await;
    let m2 = menu_id(&h.store, "m2").await;
    (h, m1, m2)
}

fn input(name: &str, menu_ids: Vec<i64>) -> RoleInput {
    RoleInput {
        name: name.to_string(),
        tenant_id: None,
        menu_ids,
    }
}

/// Role-permission rows must equal what the role's menus reach.
async fn assert_projection(store: &InMemoryStore, role_id: i64) {
    let (role_menus, role_permissions) = store.role_links().await;
    let menus: BTreeSet<i64> = role_menus
        .iter()
        .filter(|(role, _)| *role == role_id)
        .map(|(_, menu)| *menu)
        .collect();
    let reachable: BTreeSet<i64> = store
        .list_menu_permissions()
        .await
        .expect("links")
        .into_iter()
        .filter(|(menu, _)| menus.contains(menu))
        .map(|(_, permission)| permission)
        .collect();
    let granted: BTreeSet<i64> = role_permissions
        .iter()
        .filter(|(role, _)| *role == role_id)
        .map(|(_, permission)| *permission)
        .collect();
    assert_eq!(granted, reachable);
}

#[tokio::test]
async fn create_grants_menu_permissions_and_policy_rules() {
    let (h, m1, _) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create");
    assert_eq!(ops.tenant_id, 1);

    let (role_menus, role_permissions) = h.store.role_links().await;
    assert_eq!(
        role_menus.iter().filter(|(role, _)| *role == ops.id).count(),
        1
    );
    assert_eq!(
        role_permissions
            .iter()
            .filter(|(role, _)| *role == ops.id)
            .count(),
        2
    );
    assert_projection(&h.store, ops.id).await;

    let rules = h
        .policy
        .rules_for_subject("role_ops", "1")
        .await
        .expect("rules");
    assert_eq!(
        rules,
        vec![
            PolicyRule::new("/admin/x", "GET"),
            PolicyRule::new("/admin/x/:id", "GET"),
        ]
    );
    assert!(
        h.policy
            .enforce("role_ops", "1", "/admin/x/42", "GET")
            .await
            .expect("enforce")
    );
}

#[tokio::test]
async fn update_to_no_menus_clears_grants_and_rules() {
    let (h, m1, _) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create");

    h.state
        .roles
        .update_role_with_menus(ops.id, input("ops", Vec::new()))
        .await
        .expect("update");

    let (role_menus, role_permissions) = h.store.role_links().await;
    assert!(role_menus.iter().all(|(role, _)| *role != ops.id));
    assert!(role_permissions.iter().all(|(role, _)| *role != ops.id));
    assert!(
        h.policy
            .rules_for_subject("role_ops", "1")
            .await
            .expect("rules")
            .is_empty()
    );
}

#[tokio::test]
async fn unknown_menu_is_rejected_before_anything_is_written() {
    let (h, _, _) = seeded().await;
    let roles_before = h.store.list_roles().await.expect("roles").len();
    let links_before = h.store.role_links().await;

    let err = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![999]))
        .await
        .expect_err("missing menu");
    assert!(matches!(err, RoleError::Validation(_)));

    assert_eq!(h.store.list_roles().await.expect("roles").len(), roles_before);
    assert!(h.store.find_role_by_name("ops").await.expect("lookup").is_none());
    assert_eq!(h.store.role_links().await, links_before);
}

#[tokio::test]
async fn update_moves_rules_to_new_tenant_and_menu_set() {
    let (h, m1, m2) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create");

    let updated = h
        .state
        .roles
        .update_role_with_menus(
            ops.id,
            RoleInput {
                name: "auditor".to_string(),
                tenant_id: Some(7),
                menu_ids: vec![m1, m2, m1],
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.name, "auditor");
    assert_eq!(updated.tenant_id, 7);
    assert_projection(&h.store, ops.id).await;

    assert!(
        h.policy
            .rules_for_subject("role_ops", "1")
            .await
            .expect("old rules")
            .is_empty()
    );
    assert_eq!(
        h.policy
            .rules_for_subject("role_auditor", "7")
            .await
            .expect("new rules")
            .len(),
        2
    );
    let detail = h.state.roles.get_role(ops.id).await.expect("detail");
    let mut expected = vec![m1, m2];
    expected.sort_unstable();
    assert_eq!(detail.menu_ids, expected);
}

#[tokio::test]
async fn deleting_a_role_drops_links_and_rules() {
    let (h, m1, _) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create");

    h.state.roles.delete_role(ops.id).await.expect("delete");

    let (role_menus, role_permissions) = h.store.role_links().await;
    assert!(role_menus.iter().all(|(role, _)| *role != ops.id));
    assert!(role_permissions.iter().all(|(role, _)| *role != ops.id));
    assert!(
        h.policy
            .rules_for_subject("role_ops", "1")
            .await
            .expect("rules")
            .is_empty()
    );
    assert!(matches!(
        h.state.roles.get_role(ops.id).await,
        Err(RoleError::NotFound(_))
    ));
}

#[tokio::test]
async fn listing_filters_by_name() {
    let (h, m1, m2) = seeded().await;
    for (name, menus) in [("ops-east", vec![m1]), ("ops-west", vec![m2]), ("viewer", vec![])] {
        h.state
            .roles
            .create_role_with_menus(input(name, menus))
            .await
            .expect("create");
    }
    let page = h
        .state
        .roles
        .page_roles(&RoleFilter::new(Some("ops".to_string()), Some(1), Some(1)))
        .await
        .expect("page");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name, "ops-west");
}

#[tokio::test]
async fn failed_permission_linking_rolls_back_the_update() {
    let (h, m1, m2) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m2]))
        .await
        .expect("create");
    let links_before = h.store.role_links().await;
    let rules_before = h
        .policy
        .rules_for_subject("role_ops", "1")
        .await
        .expect("rules");

    let faulty = FaultyStore::new(h.store.clone());
    faulty.fail_permission_links(true);
    let service = RoleService::new(
        Arc::new(faulty),
        h.policy.clone(),
        "super_admin",
        1,
    );
    let err = service
        .update_role_with_menus(ops.id, input("ops-renamed", vec![m1]))
        .await
        .expect_err("injected failure");
    assert!(matches!(err, RoleError::Storage { .. }));

    assert_eq!(h.store.role_links().await, links_before);
    let stored = h.store.get_role(ops.id).await.expect("role");
    assert_eq!(stored.name, "ops");
    assert_eq!(
        h.policy
            .rules_for_subject("role_ops", "1")
            .await
            .expect("rules"),
        rules_before
    );
}

/// Engine that refuses every write.
struct DownEngine;

#[async_trait]
impl PolicyEngine for DownEngine {
    async fn add_rules_for_subject(
        &self,
        _subject: &str,
        _domain: &str,
        _rules: &[PolicyRule],
    ) -> AuthzResult<()> {
        Err(AuthzError::Unavailable("down".to_string()))
    }

    async fn remove_rules_for_subject(&self, _subject: &str, _domain: &str) -> AuthzResult<()> {
        Err(AuthzError::Unavailable("down".to_string()))
    }

    async fn remove_subject(&self, _subject: &str) -> AuthzResult<()> {
        Err(AuthzError::Unavailable("down".to_string()))
    }

    async fn enforce(
        &self,
        _subject: &str,
        _domain: &str,
        _resource: &str,
        _action: &str,
    ) -> AuthzResult<bool> {
        Err(AuthzError::Unavailable("down".to_string()))
    }

    async fn rules_for_subject(
        &self,
        _subject: &str,
        _domain: &str,
    ) -> AuthzResult<Vec<PolicyRule>> {
        Err(AuthzError::Unavailable("down".to_string()))
    }

    async fn subjects(&self) -> AuthzResult<Vec<String>> {
        Err(AuthzError::Unavailable("down".to_string()))
    }
}

#[tokio::test]
async fn policy_outage_does_not_fail_committed_changes() {
    let (h, m1, _) = seeded().await;
    let service = RoleService::new(
        Arc::new(h.store.clone()),
        Arc::new(DownEngine),
        "super_admin",
        1,
    );

    let ops = service
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create despite policy outage");
    assert_projection(&h.store, ops.id).await;
    service
        .update_role_with_menus(ops.id, input("ops", Vec::new()))
        .await
        .expect("update despite policy outage");
    service.delete_role(ops.id).await.expect("delete");

    // Resync still reports storage success; each failed subject is skipped.
    assert_eq!(service.resync_policies().await.expect("resync"), 0);
}

#[tokio::test]
async fn resync_restores_rules_lost_by_the_engine() {
    let (h, m1, _) = seeded().await;
    let ops = h
        .state
        .roles
        .create_role_with_menus(input("ops", vec![m1]))
        .await
        .expect("create");
    h.policy.remove_subject("role_ops").await.expect("drop rules");
    h.policy
        .add_rules_for_subject("role_ghost", "1", &[PolicyRule::new("/admin/x", "GET")])
        .await
        .expect("stray rule");

    let synced = h.state.roles.resync_policies().await.expect("resync");
    assert_eq!(synced, h.store.list_roles().await.expect("roles").len());
    assert_eq!(
        h.policy
            .rules_for_subject("role_ops", "1")
            .await
            .expect("rules")
            .len(),
        2
    );
    assert!(
        h.policy
            .rules_for_subject("role_ghost", "1")
            .await
            .expect("rules")
            .is_empty()
    );
    assert_projection(&h.store, ops.id).await;
}
