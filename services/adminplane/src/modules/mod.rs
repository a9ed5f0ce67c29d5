//! Built-in feature modules.
use crate::module::{AdminModule, ModuleCapabilities, ModuleDefinition, ModuleRegistry};
use std::sync::Arc;

pub mod rbac;
pub mod system;

/// Register every built-in module, in binding order.
pub fn register_builtin_modules(registry: &ModuleRegistry) {
    registry.register_module(
        system::NAME,
        ModuleDefinition::new(ModuleCapabilities::RoutesOnly, || {
            Ok(Arc::new(system::SystemModule) as Arc<dyn AdminModule>)
        }),
    );
    registry.register_module(
        rbac::NAME,
        ModuleDefinition::new(
            ModuleCapabilities::RoutesAndMenus(Arc::new(rbac::menus)),
            || Ok(Arc::new(rbac::RbacModule) as Arc<dyn AdminModule>),
        ),
    );
}
