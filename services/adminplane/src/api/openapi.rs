//! OpenAPI document for the admin API, served as JSON by the core module.
use crate::api::types::{
    ErrorResponse, HealthStatus, MenuRef, MenuStoreRequest, MenuTreeResponse, MenuUpdateRequest,
    PermissionListResponse, RoleCreatedResponse, RoleListResponse, RoleStoreRequest, SystemInfo,
};
use crate::api::{menus, roles, system};
use crate::model::{
    MenuDetail, MenuRecord, MenuTreeNode, PermissionRecord, Role, RoleDetail,
};
use axum::Json;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "adminplane",
        version = "v1",
        description = "Admin roles, menus and permissions"
    ),
    paths(
        system::ping,
        system::system_info,
        system::system_health,
        roles::list_roles,
        roles::get_role,
        roles::create_role,
        roles::update_role,
        roles::delete_role,
        menus::menu_tree,
        menus::create_menu,
        menus::get_menu,
        menus::update_menu,
        menus::list_permissions
    ),
    components(schemas(
        SystemInfo,
        HealthStatus,
        ErrorResponse,
        MenuRef,
        RoleStoreRequest,
        RoleCreatedResponse,
        RoleListResponse,
        Role,
        RoleDetail,
        MenuRecord,
        MenuDetail,
        MenuStoreRequest,
        MenuUpdateRequest,
        MenuTreeNode,
        MenuTreeResponse,
        PermissionRecord,
        PermissionListResponse
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "system", description = "Liveness and service metadata"),
        (name = "roles", description = "Role authoring"),
        (name = "menus", description = "Menus and discovered permissions")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
