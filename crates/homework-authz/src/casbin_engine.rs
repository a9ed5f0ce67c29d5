//! In-process Casbin implementation of [`PolicyEngine`].
//!
//! # Purpose
//! Holds the enforcer behind an async lock so request handlers can enforce
//! concurrently while role authoring replaces rule sets.
//!
//! # Security considerations
//! - Domain scoping is mandatory; every rule carries the tenant domain.
//! - Rules are held in memory and rebuilt from relational state on startup.
use crate::{AuthzError, AuthzResult, PolicyEngine, PolicyRule, route_rule_model};
use async_trait::async_trait;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

pub struct CasbinPolicyEngine {
    enforcer: RwLock<Enforcer>,
}

impl CasbinPolicyEngine {
    /// Build an engine with the embedded model and an empty in-memory adapter.
    ///
    /// # Errors
    /// - Returns Casbin errors when the model fails to load.
    ///
    /// # Example
    /// ```rust
    /// use homework_authz::{CasbinPolicyEngine, PolicyEngine, PolicyRule};
    ///
    /// # async fn demo() -> homework_authz::AuthzResult<()> {
    /// let engine = CasbinPolicyEngine::new().await?;
    /// engine
    ///     .add_rules_for_subject("role_ops", "1", &[PolicyRule::new("/admin/x", "GET")])
    ///     .await?;
    /// assert!(engine.enforce("role_ops", "1", "/admin/x", "GET").await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new() -> AuthzResult<Self> {
        let model = route_rule_model().await?;
        let adapter = MemoryAdapter::default();
        let enforcer = Enforcer::new(model, adapter).await?;
        Ok(Self {
            enforcer: RwLock::new(enforcer),
        })
    }
}

fn validate(rule: &PolicyRule) -> AuthzResult<()> {
    if rule.resource.trim().is_empty() {
        return Err(AuthzError::InvalidRule("empty resource".to_string()));
    }
    if rule.action.trim().is_empty() {
        return Err(AuthzError::InvalidRule("empty action".to_string()));
    }
    Ok(())
}

#[async_trait]
impl PolicyEngine for CasbinPolicyEngine {
    async fn add_rules_for_subject(
        &self,
        subject: &str,
        domain: &str,
        rules: &[PolicyRule],
    ) -> AuthzResult<()> {
        for rule in rules {
            validate(rule)?;
        }
        let mut enforcer = self.enforcer.write().await;
        // Casbin rejects the whole batch when any rule already exists.
        let fresh: BTreeSet<Vec<String>> = rules
            .iter()
            .map(|rule| {
                vec![
                    subject.to_string(),
                    domain.to_string(),
                    rule.resource.clone(),
                    rule.action.clone(),
                ]
            })
            .filter(|params| !enforcer.has_policy(params.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        let count = fresh.len();
        enforcer.add_policies(fresh.into_iter().collect()).await?;
        tracing::debug!(subject, domain, count, "policy rules added");
        Ok(())
    }

    async fn remove_rules_for_subject(&self, subject: &str, domain: &str) -> AuthzResult<()> {
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_policy(0, vec![subject.to_string(), domain.to_string()])
            .await?;
        tracing::debug!(subject, domain, "policy rules removed");
        Ok(())
    }

    async fn remove_subject(&self, subject: &str) -> AuthzResult<()> {
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_policy(0, vec![subject.to_string()])
            .await?;
        Ok(())
    }

    async fn enforce(
        &self,
        subject: &str,
        domain: &str,
        resource: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let enforcer = self.enforcer.read().await;
        Ok(enforcer.enforce((subject, domain, resource, action))?)
    }

    async fn rules_for_subject(
        &self,
        subject: &str,
        domain: &str,
    ) -> AuthzResult<Vec<PolicyRule>> {
        let enforcer = self.enforcer.read().await;
        let mut rules: Vec<PolicyRule> = enforcer
            .get_filtered_policy(0, vec![subject.to_string(), domain.to_string()])
            .into_iter()
            .filter(|rule| rule.len() >= 4)
            .map(|rule| PolicyRule::new(rule[2].clone(), rule[3].clone()))
            .collect();
        rules.sort();
        Ok(rules)
    }

    async fn subjects(&self) -> AuthzResult<Vec<String>> {
        let enforcer = self.enforcer.read().await;
        let subjects: BTreeSet<String> = enforcer.get_all_subjects().into_iter().collect();
        Ok(subjects.into_iter().collect())
    }
}
