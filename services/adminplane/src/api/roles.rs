//! Role authoring API handlers.
//!
//! # Purpose
//! Thin adapters from HTTP to [`crate::service::RoleService`]; every rule
//! about names, menus and policy mirroring lives in the service.
//!
//! # Tenant scope
//! Callers act inside the tenant of their token. A role body without
//! `tenant_id` lands in that tenant, and naming or touching another tenant's
//! role is 403. Only the super role reaches across tenants.
use crate::api::error::{ApiError, api_forbidden, api_from_role_error, api_validation_error};
use crate::api::types::{
    ErrorResponse, RoleCreatedResponse, RoleListQuery, RoleListResponse, RoleStoreRequest,
};
use crate::app::AppState;
use crate::auth::AdminClaims;
use crate::model::{Role, RoleDetail, RoleFilter};
use crate::service::RoleInput;
use axum::{Extension, Json};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

fn parse_role_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| api_validation_error("role id must be a positive integer"))
}

/// Tenant the caller is confined to; `None` for the super role.
fn caller_tenant(state: &AppState, claims: &AdminClaims) -> Option<i64> {
    if claims.role == state.roles.super_role() {
        None
    } else {
        Some(claims.tid)
    }
}

/// Resolve the tenant a role body targets, defaulting to the caller's.
fn target_tenant(
    scope: Option<i64>,
    claims: &AdminClaims,
    requested: Option<i64>,
) -> Result<i64, ApiError> {
    let tenant_id = requested.unwrap_or(claims.tid);
    check_tenant(scope, tenant_id)?;
    Ok(tenant_id)
}

fn check_tenant(scope: Option<i64>, tenant_id: i64) -> Result<(), ApiError> {
    match scope {
        Some(own) if own != tenant_id => {
            tracing::info!(tenant_id, caller_tenant = own, "cross-tenant role access denied");
            Err(api_forbidden("role belongs to another tenant"))
        }
        _ => Ok(()),
    }
}

#[utoipa::path(
    get,
    path = "/admin/roles",
    tag = "roles",
    params(RoleListQuery),
    responses(
        (status = 200, description = "Roles, newest first", body = RoleListResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
    Query(query): Query<RoleListQuery>,
) -> Result<Json<RoleListResponse>, ApiError> {
    let filter = RoleFilter::new(query.name, query.page, query.per_page);
    let page = state
        .roles
        .page_roles(&filter)
        .await
        .map_err(api_from_role_error)?;
    Ok(Json(RoleListResponse {
        items: page.items,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/roles/{id}",
    tag = "roles",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role with its menus and permissions", body = RoleDetail),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn get_role(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
) -> Result<Json<RoleDetail>, ApiError> {
    let id = parse_role_id(&id)?;
    let detail = state.roles.get_role(id).await.map_err(api_from_role_error)?;
    check_tenant(caller_tenant(&state, &claims), detail.role.tenant_id)?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/admin/roles",
    tag = "roles",
    request_body = RoleStoreRequest,
    responses(
        (status = 201, description = "Role created", body = RoleCreatedResponse),
        (status = 400, description = "Invalid name or unknown menu", body = ErrorResponse),
        (status = 403, description = "Tenant outside the caller's scope", body = ErrorResponse),
        (status = 409, description = "Role name taken", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Json(body): Json<RoleStoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = caller_tenant(&state, &claims);
    let mut input: RoleInput = body.into();
    input.tenant_id = Some(target_tenant(scope, &claims, input.tenant_id)?);
    let role = state
        .roles
        .create_role_with_menus(input)
        .await
        .map_err(api_from_role_error)?;
    Ok((StatusCode::CREATED, Json(RoleCreatedResponse { id: role.id })))
}

#[utoipa::path(
    put,
    path = "/admin/roles/{id}",
    tag = "roles",
    params(("id" = i64, Path, description = "Role id")),
    request_body = RoleStoreRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 400, description = "Invalid name or unknown menu", body = ErrorResponse),
        (status = 403, description = "Tenant outside the caller's scope", body = ErrorResponse),
        (status = 404, description = "Role not found", body = ErrorResponse),
        (status = 409, description = "Role name taken", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn update_role(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Json(body): Json<RoleStoreRequest>,
) -> Result<Json<Role>, ApiError> {
    let id = parse_role_id(&id)?;
    let scope = caller_tenant(&state, &claims);
    let existing = state.roles.get_role(id).await.map_err(api_from_role_error)?;
    check_tenant(scope, existing.role.tenant_id)?;
    let mut input: RoleInput = body.into();
    if let Some(tenant_id) = input.tenant_id {
        check_tenant(scope, tenant_id)?;
    } else {
        input.tenant_id = Some(existing.role.tenant_id);
    }
    let role = state
        .roles
        .update_role_with_menus(id, input)
        .await
        .map_err(api_from_role_error)?;
    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/admin/roles/{id}",
    tag = "roles",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (
            status = 403,
            description = "Reserved role or another tenant's role",
            body = ErrorResponse
        ),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn delete_role(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
) -> Result<StatusCode, ApiError> {
    let id = parse_role_id(&id)?;
    let existing = state.roles.get_role(id).await.map_err(api_from_role_error)?;
    check_tenant(caller_tenant(&state, &claims), existing.role.tenant_id)?;
    state
        .roles
        .delete_role(id)
        .await
        .map_err(api_from_role_error)?;
    Ok(StatusCode::NO_CONTENT)
}
