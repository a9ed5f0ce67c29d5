//! System module: liveness and service metadata. Declares no menus.
use crate::api::system;
use crate::module::{AdminModule, RouteGroups};

pub const NAME: &str = "system";

pub struct SystemModule;

impl AdminModule for SystemModule {
    fn register_routes(&self, groups: &mut RouteGroups) {
        groups.api.get("/ping", system::ping);
        groups
            .admin_auth
            .get("/system/info", system::system_info)
            .get("/system/health", system::system_health);
    }
}
