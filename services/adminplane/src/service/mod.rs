//! Application services invoked by the HTTP handlers.
pub mod menus;
pub mod roles;

pub use menus::{MenuError, MenuService};
pub use roles::{RoleError, RoleInput, RoleService};
