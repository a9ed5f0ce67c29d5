//! Domain records for permissions, menus and roles.
//!
//! # Purpose
//! Plain data shared by the stores, the reconciliation pass, the role
//! authoring service and the HTTP layer. Nothing here touches storage.
mod menu;
mod permission;
mod role;

pub use menu::{
    MenuDetail, MenuNode, MenuRecord, MenuTreeNode, MenuUpdate, NewMenu, build_menu_tree,
};
pub use permission::{PermissionDeclaration, PermissionRecord};
pub use role::{Role, RoleDetail, RoleFilter, RolePage};
