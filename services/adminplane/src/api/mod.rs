//! Admin HTTP API.
//!
//! # Purpose
//! Request handlers, payload types, error translation and the OpenAPI
//! document. Handlers are bound into route groups by the feature modules in
//! [`crate::modules`].
pub mod error;
pub mod menus;
pub mod openapi;
pub mod roles;
pub mod system;
pub mod types;
