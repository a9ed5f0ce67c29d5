//! RBAC module: role authoring, menu management and permission browsing.
use crate::api::{menus, openapi, roles};
use crate::model::{MenuNode, PermissionDeclaration};
use crate::module::{AdminModule, RouteGroups};

pub const NAME: &str = "rbac";

pub struct RbacModule;

impl AdminModule for RbacModule {
    fn register_routes(&self, groups: &mut RouteGroups) {
        groups
            .admin_auth
            .get("/roles", roles::list_roles)
            .post("/roles", roles::create_role)
            .get("/roles/:id", roles::get_role)
            .put("/roles/:id", roles::update_role)
            .delete("/roles/:id", roles::delete_role)
            .get("/menus", menus::menu_tree)
            .post("/menus", menus::create_menu)
            .get("/menus/:id", menus::get_menu)
            .put("/menus/:id", menus::update_menu)
            .get("/permissions", menus::list_permissions);
        groups.admin.get("/openapi.json", openapi::openapi_json);
    }
}

/// Menus declared by the RBAC module.
pub fn menus() -> Vec<MenuNode> {
    vec![
        MenuNode::new("system-setting", "System settings")
            .sort(100)
            .child(
                MenuNode::new("role-management", "Roles")
                    .sort(1)
                    .permission(PermissionDeclaration::named("GET", "/admin/roles", "List roles"))
                    .child(MenuNode::new("role-add", "Add role").sort(1).permission(
                        PermissionDeclaration::named("POST", "/admin/roles", "Create role"),
                    ))
                    .child(MenuNode::new("role-update", "Edit role").sort(2).permission(
                        PermissionDeclaration::named("PUT", "/admin/roles/:id", "Update role"),
                    ))
                    .child(MenuNode::new("role-detail", "Role detail").sort(3).permission(
                        PermissionDeclaration::named("GET", "/admin/roles/:id", "Show role"),
                    ))
                    .child(MenuNode::new("role-delete", "Delete role").sort(4).permission(
                        PermissionDeclaration::named("DELETE", "/admin/roles/:id", "Delete role"),
                    )),
            )
            .child(
                MenuNode::new("menu-management", "Menus")
                    .sort(2)
                    .permission(PermissionDeclaration::named("GET", "/admin/menus", "Menu tree"))
                    .permission(PermissionDeclaration::named(
                        "GET",
                        "/admin/permissions",
                        "List permissions",
                    ))
                    .child(MenuNode::new("menu-add", "Add menu").sort(1).permission(
                        PermissionDeclaration::named("POST", "/admin/menus", "Create menu"),
                    ))
                    .child(MenuNode::new("menu-update", "Edit menu").sort(2).permission(
                        PermissionDeclaration::named("PUT", "/admin/menus/:id", "Update menu"),
                    ))
                    .child(MenuNode::new("menu-detail", "Menu detail").sort(3).permission(
                        PermissionDeclaration::named("GET", "/admin/menus/:id", "Show menu"),
                    )),
            ),
    ]
}
