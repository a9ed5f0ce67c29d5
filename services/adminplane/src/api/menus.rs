//! Menu tree, operator menu management and permission listing.
use crate::api::error::{ApiError, api_from_menu_error, api_internal, api_validation_error};
use crate::api::types::{
    ErrorResponse, MenuStoreRequest, MenuTreeResponse, MenuUpdateRequest, PermissionListResponse,
};
use crate::app::AppState;
use crate::model::{MenuDetail, MenuRecord, build_menu_tree};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

fn parse_menu_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| api_validation_error("menu id must be a positive integer"))
}

#[utoipa::path(
    get,
    path = "/admin/menus",
    tag = "menus",
    responses(
        (
            status = 200,
            description = "Stored menus as a tree with linked permissions",
            body = MenuTreeResponse
        )
    ),
    security(("bearer" = []))
)]
pub(crate) async fn menu_tree(
    State(state): State<AppState>,
) -> Result<Json<MenuTreeResponse>, ApiError> {
    let menus = state
        .store
        .list_menus()
        .await
        .map_err(|err| api_internal("failed to list menus", &err))?;
    let links = state
        .store
        .list_menu_permissions()
        .await
        .map_err(|err| api_internal("failed to list menu permissions", &err))?;
    let permissions = state
        .store
        .list_permissions()
        .await
        .map_err(|err| api_internal("failed to list permissions", &err))?;
    Ok(Json(MenuTreeResponse {
        items: build_menu_tree(menus, &links, &permissions),
    }))
}

#[utoipa::path(
    get,
    path = "/admin/permissions",
    tag = "menus",
    responses(
        (status = 200, description = "Discovered permissions", body = PermissionListResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn list_permissions(
    State(state): State<AppState>,
) -> Result<Json<PermissionListResponse>, ApiError> {
    let items = state
        .store
        .list_permissions()
        .await
        .map_err(|err| api_internal("failed to list permissions", &err))?;
    Ok(Json(PermissionListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/admin/menus",
    tag = "menus",
    request_body = MenuStoreRequest,
    responses(
        (status = 201, description = "Menu created", body = MenuRecord),
        (status = 400, description = "Invalid fields or unknown parent", body = ErrorResponse),
        (status = 409, description = "Menu number taken", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn create_menu(
    State(state): State<AppState>,
    Json(body): Json<MenuStoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let menu = state
        .menus
        .create_menu(body.into())
        .await
        .map_err(api_from_menu_error)?;
    Ok((StatusCode::CREATED, Json(menu)))
}

#[utoipa::path(
    get,
    path = "/admin/menus/{id}",
    tag = "menus",
    params(("id" = i64, Path, description = "Menu id")),
    responses(
        (status = 200, description = "Menu with its linked permissions", body = MenuDetail),
        (status = 404, description = "Menu not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn get_menu(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MenuDetail>, ApiError> {
    let id = parse_menu_id(&id)?;
    let detail = state.menus.get_menu(id).await.map_err(api_from_menu_error)?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/admin/menus/{id}",
    tag = "menus",
    params(("id" = i64, Path, description = "Menu id")),
    request_body = MenuUpdateRequest,
    responses(
        (status = 200, description = "Menu updated", body = MenuRecord),
        (status = 400, description = "Invalid fields", body = ErrorResponse),
        (status = 404, description = "Menu not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn update_menu(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<MenuUpdateRequest>,
) -> Result<Json<MenuRecord>, ApiError> {
    let id = parse_menu_id(&id)?;
    let menu = state
        .menus
        .update_menu(id, body.into())
        .await
        .map_err(api_from_menu_error)?;
    Ok(Json(menu))
}
