//! Route groups and the live route table.
//!
//! # Purpose
//! Modules bind handlers through [`RouteGroup`]s instead of touching the axum
//! router directly. Every binding is recorded in a shared [`RouteTable`], which
//! permission discovery later walks.
//!
//! # Key invariants
//! - A recorded path is exactly the pattern axum matches on (and what
//!   `MatchedPath` reports), e.g. `/admin/roles/:id`.
//! - Methods are recorded upper-case.
use crate::app::AppState;
use axum::Router;
use axum::handler::Handler;
use axum::http::Method;
use axum::routing::MethodRouter;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
}

/// Shared, append-only record of every bound route.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<Vec<RouteInfo>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, method: &Method, path: &str) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.push(RouteInfo {
            method: method.as_str().to_ascii_uppercase(),
            path: path.to_string(),
        });
    }

    /// Snapshot of the live table in binding order.
    pub fn list_routes(&self) -> Vec<RouteInfo> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Routes whose path starts with `prefix`.
    pub fn routes_with_prefix(&self, prefix: &str) -> Vec<RouteInfo> {
        self.list_routes()
            .into_iter()
            .filter(|route| route.path.starts_with(prefix))
            .collect()
    }
}

/// Join a group prefix and a module-relative path without doubling slashes.
fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}/{path}")
    }
}

/// A prefix-scoped router that records what it binds.
pub struct RouteGroup {
    prefix: String,
    router: Router<AppState>,
    table: RouteTable,
    bound: usize,
}

impl RouteGroup {
    fn new(prefix: &str, table: RouteTable) -> Self {
        Self {
            prefix: prefix.to_string(),
            router: Router::new(),
            table,
            bound: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bind `route` at `path` relative to the group prefix, recording it as
    /// `method`.
    pub fn bind(
        &mut self,
        method: Method,
        path: &str,
        route: MethodRouter<AppState>,
    ) -> &mut Self {
        let full = join_path(&self.prefix, path);
        self.table.record(&method, &full);
        let router = std::mem::replace(&mut self.router, Router::new());
        self.router = router.route(&full, route);
        self.bound += 1;
        self
    }

    pub fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.bind(Method::GET, path, axum::routing::get(handler))
    }

    pub fn post<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.bind(Method::POST, path, axum::routing::post(handler))
    }

    pub fn put<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.bind(Method::PUT, path, axum::routing::put(handler))
    }

    pub fn delete<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.bind(Method::DELETE, path, axum::routing::delete(handler))
    }

    pub fn is_empty(&self) -> bool {
        self.bound == 0
    }

    fn into_router(self) -> Router<AppState> {
        self.router
    }
}

/// The four groups modules bind into: public and authenticated API routes,
/// public and policy-enforced admin routes.
pub struct RouteGroups {
    pub api: RouteGroup,
    pub api_auth: RouteGroup,
    pub admin: RouteGroup,
    pub admin_auth: RouteGroup,
}

impl RouteGroups {
    pub fn new(table: RouteTable, api_prefix: &str, admin_prefix: &str) -> Self {
        Self {
            api: RouteGroup::new(api_prefix, table.clone()),
            api_auth: RouteGroup::new(api_prefix, table.clone()),
            admin: RouteGroup::new(admin_prefix, table.clone()),
            admin_auth: RouteGroup::new(admin_prefix, table),
        }
    }

    /// Merge the groups into one router, layering authentication on
    /// `api_auth` and policy enforcement on `admin_auth`.
    pub fn into_router(self, state: &AppState) -> Router<AppState> {
        let mut router = Router::new()
            .merge(self.api.into_router())
            .merge(self.admin.into_router());
        // route_layer panics on a router without routes.
        if !self.api_auth.is_empty() {
            router = router.merge(self.api_auth.into_router().route_layer(
                axum::middleware::from_fn_with_state(
                    state.clone(),
                    crate::auth::middleware::require_token,
                ),
            ));
        }
        if !self.admin_auth.is_empty() {
            router = router.merge(self.admin_auth.into_router().route_layer(
                axum::middleware::from_fn_with_state(
                    state.clone(),
                    crate::auth::middleware::enforce_admin_policy,
                ),
            ));
        }
        router
    }
}
