//! Admin-plane service library crate.
//!
//! # Purpose
//! Composes feature modules into an HTTP service, reconciles permission and
//! menu storage against what those modules bind and declare, and authors
//! roles whose grants are mirrored into the policy engine.
//!
//! # Notes
//! `module` holds the composition machinery, `modules` the built-in features,
//! `reconcile` the startup pass and `service` the role authoring workflow.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod module;
pub mod modules;
pub mod observability;
pub mod reconcile;
pub mod service;
pub mod store;
