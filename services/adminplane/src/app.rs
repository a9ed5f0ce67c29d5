//! Admin-plane application wiring.
//!
//! # Purpose
//! Defines the shared handler state and the startup sequence: bind every
//! registered module's routes, reconcile storage against them, then assemble
//! the router.
//!
//! # Notes
//! The sequence is a plain function over explicit values so tests can drive it
//! with their own modules and stores.
use crate::config::{AdminPlaneConfig, JwtConfig, ReconcileConfig};
use crate::module::{MenuRegistry, ModuleRegistry, RouteGroups, RouteTable};
use crate::modules::register_builtin_modules;
use crate::observability;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::service::{MenuService, RoleService};
use crate::store::RbacStore;
use anyhow::Context;
use axum::Router;
use homework_authz::PolicyEngine;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Prefix of the public and token-only API groups.
pub const API_PREFIX: &str = "/api";

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub api_version: String,
    pub store: Arc<dyn RbacStore>,
    pub policy: Arc<dyn PolicyEngine>,
    pub roles: Arc<RoleService>,
    pub menus: Arc<MenuService>,
    pub routes: RouteTable,
    pub jwt: JwtConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RbacStore>,
        policy: Arc<dyn PolicyEngine>,
        jwt: JwtConfig,
        reconcile: &ReconcileConfig,
    ) -> Self {
        let roles = Arc::new(RoleService::new(
            Arc::clone(&store),
            Arc::clone(&policy),
            &reconcile.super_role,
            reconcile.default_tenant_id,
        ));
        let menus = Arc::new(MenuService::new(Arc::clone(&store)));
        Self {
            service_name: "adminplane".to_string(),
            api_version: "v1".to_string(),
            store,
            policy,
            roles,
            menus,
            routes: RouteTable::new(),
            jwt,
        }
    }

    pub fn from_config(
        store: Arc<dyn RbacStore>,
        policy: Arc<dyn PolicyEngine>,
        config: &AdminPlaneConfig,
    ) -> Self {
        Self::new(store, policy, config.jwt.clone(), &config.reconcile)
    }
}

/// Module registry preloaded with the built-in modules.
pub fn default_modules() -> ModuleRegistry {
    let registry = ModuleRegistry::new(Arc::new(MenuRegistry::new()));
    register_builtin_modules(&registry);
    registry
}

pub struct Bootstrapped {
    pub router: Router,
    pub report: ReconcileReport,
}

/// Bind module routes, reconcile, and build the router.
///
/// # Errors
/// - A module initializer fails.
/// - Permission discovery or pruning hits a storage error.
pub async fn bootstrap(
    state: AppState,
    config: &ReconcileConfig,
    modules: &ModuleRegistry,
) -> anyhow::Result<Bootstrapped> {
    let mut groups = RouteGroups::new(state.routes.clone(), API_PREFIX, &config.admin_prefix);
    let bound = modules
        .auto_register_all(&mut groups)
        .context("module initialization failed")?;
    tracing::info!(
        modules = bound,
        routes = state.routes.list_routes().len(),
        "modules bound"
    );

    let reconciler = Reconciler::new(
        Arc::clone(&state.store),
        state.routes.clone(),
        Arc::clone(modules.menus()),
        Arc::clone(&state.roles),
        config.clone(),
    );
    let report = reconciler
        .run()
        .await
        .context("startup reconciliation failed")?;

    let router = build_router(groups, state);
    Ok(Bootstrapped { router, report })
}

pub fn build_router(groups: RouteGroups, state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    groups
        .into_router(&state)
        .layer(trace_layer)
        .with_state(state)
}
