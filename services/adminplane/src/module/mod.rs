//! Module composition: route groups, menu aggregation and the lazy module
//! registry that wires them together at startup.
pub mod menus;
pub mod registry;
pub mod routes;

pub use menus::{MenuProvider, MenuRegistry};
pub use registry::{AdminModule, ModuleCapabilities, ModuleDefinition, ModuleError, ModuleRegistry};
pub use routes::{RouteGroup, RouteGroups, RouteInfo, RouteTable};
