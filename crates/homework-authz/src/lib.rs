//! Authorization primitives shared by the admin services.
//!
//! # Purpose
//! Centralizes the Casbin model, the policy-engine seam used by the role
//! authoring workflow, and the naming rules for policy subjects and domains.
//!
//! # How it fits
//! The admin plane persists roles, menus and permissions relationally and
//! mirrors the derived rule set for each role into a [`PolicyEngine`]. The
//! request middleware consults the same engine on every authenticated admin
//! request.
//!
//! # Key invariants
//! - Subjects are `role_<role name>`; domains are the tenant id rendered as a
//!   decimal string.
//! - Rule resources are route patterns and are matched with `keyMatch2`, so
//!   `/admin/roles/:id` covers `/admin/roles/42`.
//!
//! # Examples
//! ```rust
//! use homework_authz::{role_subject, tenant_domain};
//!
//! assert_eq!(role_subject("ops"), "role_ops");
//! assert_eq!(tenant_domain(7), "7");
//! ```

mod casbin_engine;
mod casbin_model;
mod engine;
mod errors;
mod subject;

pub use casbin_engine::CasbinPolicyEngine;
pub use casbin_model::route_rule_model;
pub use engine::{PolicyEngine, PolicyRule};
pub use errors::{AuthzError, AuthzResult};
pub use subject::{ROLE_SUBJECT_PREFIX, role_name_from_subject, role_subject, tenant_domain};
