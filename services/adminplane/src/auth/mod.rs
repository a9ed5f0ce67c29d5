//! Admin authentication and policy enforcement.
//!
//! # Purpose
//! Verifies bearer tokens on authenticated routes and consults the policy
//! engine for every request on the enforced admin group.
pub mod middleware;
pub mod token;

pub use token::{AdminClaims, AdminTokenSigner, TokenError, verify_admin_token};
