//! Policy-engine seam.
//!
//! # Purpose
//! Describes the operations the admin plane needs from an external
//! authorization engine: replace a subject's rules within a domain and answer
//! enforcement queries.
//!
//! # Key invariants
//! - The rule set stored for a subject is a projection of relational state and
//!   may be rebuilt at any time; engines never act as the source of truth.
//! - Adding a rule that already exists is a no-op.
use crate::AuthzResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single (resource, action) grant. Subject and domain are supplied by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Route pattern, e.g. `/admin/roles/:id`.
    pub resource: String,
    /// HTTP method, e.g. `GET`.
    pub action: String,
}

impl PolicyRule {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Add `rules` for `subject` within `domain`. Existing rules are kept.
    async fn add_rules_for_subject(
        &self,
        subject: &str,
        domain: &str,
        rules: &[PolicyRule],
    ) -> AuthzResult<()>;

    /// Remove every rule for `subject` within `domain`.
    async fn remove_rules_for_subject(&self, subject: &str, domain: &str) -> AuthzResult<()>;

    /// Remove every rule for `subject` across all domains.
    async fn remove_subject(&self, subject: &str) -> AuthzResult<()>;

    async fn enforce(
        &self,
        subject: &str,
        domain: &str,
        resource: &str,
        action: &str,
    ) -> AuthzResult<bool>;

    /// Rules currently held for `subject` within `domain`, sorted.
    async fn rules_for_subject(&self, subject: &str, domain: &str)
    -> AuthzResult<Vec<PolicyRule>>;

    /// Every subject that owns at least one rule.
    async fn subjects(&self) -> AuthzResult<Vec<String>>;
}
