#![allow(dead_code)]

pub mod faulty;

use adminplane::app::AppState;
use adminplane::config::{JwtConfig, ReconcileConfig};
use adminplane::model::{MenuNode, MenuRecord, PermissionRecord};
use adminplane::module::{
    AdminModule, MenuProvider, MenuRegistry, ModuleCapabilities, ModuleDefinition,
    ModuleRegistry, RouteGroups,
};
use adminplane::store::RbacStore;
use adminplane::store::memory::InMemoryStore;
use homework_authz::CasbinPolicyEngine;
use std::sync::Arc;

pub const TEST_SECRET: &str = "integration-secret";
pub const TEST_ISSUER: &str = "homework-admin";

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: TEST_SECRET.to_string(),
        issuer: TEST_ISSUER.to_string(),
    }
}

pub fn reconcile_config() -> ReconcileConfig {
    ReconcileConfig {
        menu_upsert_concurrency: 4,
        ..ReconcileConfig::default()
    }
}

pub struct Harness {
    pub store: InMemoryStore,
    pub policy: Arc<CasbinPolicyEngine>,
    pub state: AppState,
}

/// Fresh state over `store`, with its own route table and policy engine.
pub async fn harness_with(store: InMemoryStore) -> Harness {
    let policy = Arc::new(CasbinPolicyEngine::new().await.expect("engine"));
    let state = AppState::new(
        Arc::new(store.clone()),
        policy.clone(),
        jwt_config(),
        &reconcile_config(),
    );
    Harness {
        store,
        policy,
        state,
    }
}

pub async fn harness() -> Harness {
    harness_with(InMemoryStore::new()).await
}

/// Module binding trivial admin routes given as (method, module-relative path).
pub struct StubModule {
    routes: Vec<(&'static str, &'static str)>,
}

async fn ok() -> &'static str {
    "ok"
}

impl AdminModule for StubModule {
    fn register_routes(&self, groups: &mut RouteGroups) {
        for (method, path) in &self.routes {
            match *method {
                "GET" => groups.admin_auth.get(path, ok),
                "POST" => groups.admin_auth.post(path, ok),
                "PUT" => groups.admin_auth.put(path, ok),
                "DELETE" => groups.admin_auth.delete(path, ok),
                other => panic!("unsupported method {other}"),
            };
        }
    }
}

pub fn register_stub(
    registry: &ModuleRegistry,
    name: &str,
    routes: Vec<(&'static str, &'static str)>,
    menus: Option<Vec<MenuNode>>,
) {
    let capabilities = match menus {
        Some(menus) => {
            let provider: Arc<dyn MenuProvider> = Arc::new(move || menus.clone());
            ModuleCapabilities::RoutesAndMenus(provider)
        }
        None => ModuleCapabilities::RoutesOnly,
    };
    registry.register_module(
        name,
        ModuleDefinition::ready(capabilities, Arc::new(StubModule { routes })),
    );
}

pub fn empty_registry() -> ModuleRegistry {
    ModuleRegistry::new(Arc::new(MenuRegistry::new()))
}

#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub permissions: Vec<PermissionRecord>,
    pub menus: Vec<MenuRecord>,
    pub menu_permissions: Vec<(i64, i64)>,
    pub role_menus: Vec<(i64, i64)>,
    pub role_permissions: Vec<(i64, i64)>,
}

pub async fn snapshot(store: &InMemoryStore) -> Snapshot {
    let (role_menus, role_permissions) = store.role_links().await;
    Snapshot {
        permissions: store.list_permissions().await.expect("permissions"),
        menus: store.list_menus().await.expect("menus"),
        menu_permissions: store.list_menu_permissions().await.expect("links"),
        role_menus,
        role_permissions,
    }
}

pub async fn permission_id(store: &InMemoryStore, method: &str, path: &str) -> Option<i64> {
    store
        .find_permission(path, method)
        .await
        .expect("lookup")
        .map(|permission| permission.id)
}

pub async fn menu_id(store: &InMemoryStore, number: &str) -> i64 {
    store
        .find_menu_by_number(number)
        .await
        .expect("lookup")
        .expect("menu")
        .id
}
