//! HTTP request/response payloads.
use crate::model::{MenuTreeNode, MenuUpdate, NewMenu, PermissionRecord, Role};
use crate::service::RoleInput;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub service: String,
    pub api_version: String,
    pub storage_backend: String,
    pub durable_storage: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MenuRef {
    pub id: i64,
}

/// Body of role create and update.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleStoreRequest {
    pub name: String,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub menus: Vec<MenuRef>,
}

impl From<RoleStoreRequest> for RoleInput {
    fn from(request: RoleStoreRequest) -> Self {
        RoleInput {
            name: request.name,
            tenant_id: request.tenant_id,
            menu_ids: request.menus.into_iter().map(|menu| menu.id).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreatedResponse {
    pub id: i64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleListQuery {
    /// Substring of the role name.
    pub name: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleListResponse {
    pub items: Vec<Role>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Body of operator menu creation.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MenuStoreRequest {
    pub number: String,
    pub name: String,
    /// 0 for a root menu.
    #[serde(default)]
    pub parent_id: i64,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub is_disabled: bool,
}

impl From<MenuStoreRequest> for NewMenu {
    fn from(request: MenuStoreRequest) -> Self {
        NewMenu {
            number: request.number,
            name: request.name,
            parent_id: request.parent_id,
            sort: request.sort,
            is_disabled: request.is_disabled,
        }
    }
}

/// Body of a menu edit; absent fields are left unchanged.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct MenuUpdateRequest {
    pub name: Option<String>,
    pub sort: Option<i32>,
    pub is_disabled: Option<bool>,
}

impl From<MenuUpdateRequest> for MenuUpdate {
    fn from(request: MenuUpdateRequest) -> Self {
        MenuUpdate {
            name: request.name,
            sort: request.sort,
            is_disabled: request.is_disabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MenuTreeResponse {
    pub items: Vec<MenuTreeNode>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionListResponse {
    pub items: Vec<PermissionRecord>,
}
