//! Role authoring.
//!
//! # Purpose
//! Creates, updates and deletes roles together with their menu grants, and
//! mirrors each role's derived permission set into the policy engine.
//!
//! # Key invariants
//! - Every relational write of one mutation goes through a single [`RbacTx`];
//!   an error before commit leaves no trace.
//! - The policy engine is only told about a mutation after it commits.
//! - A role's rule set is `role_<name>` in domain `<tenant_id>` with one rule
//!   per permission reachable through its menus.
//!
//! # Consistency
//! Policy-engine failures after commit are logged and counted in
//! `adminplane_policy_sync_failures_total`; the request still succeeds.
//! [`RoleService::resync_policies`] rebuilds every rule set from relational
//! state and runs at startup and, when configured, periodically.
//!
//! Each mutation also bumps the stored policy revision in its transaction.
//! [`RoleService::sync_policies_if_stale`] compares that revision with the
//! one this instance last rebuilt from and resyncs on a mismatch, so
//! instances sharing one store converge before their next enforcement.
use crate::model::{PermissionRecord, Role, RoleDetail, RoleFilter, RolePage};
use crate::store::{RbacStore, RbacTx, StoreError, StoreResult};
use homework_authz::{
    AuthzError, PolicyEngine, PolicyRule, role_name_from_subject, role_subject, tenant_domain,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Marks an engine that was never rebuilt against a known revision.
const NO_REVISION: i64 = i64::MIN;

pub const MAX_ROLE_NAME_CHARS: usize = 30;

/// Caller-supplied role fields. `tenant_id` falls back to the service default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInput {
    pub name: String,
    pub tenant_id: Option<i64>,
    pub menu_ids: Vec<i64>,
}

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("{0}")]
    Validation(String),
    /// Another role already uses the name. Reported separately from other
    /// validation failures so the HTTP layer can answer 409.
    #[error("role {0} already exists")]
    Duplicate(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl RoleError {
    fn storage(context: &'static str) -> impl FnOnce(StoreError) -> RoleError {
        move |source| RoleError::Storage { context, source }
    }
}

pub struct RoleService {
    store: Arc<dyn RbacStore>,
    policy: Arc<dyn PolicyEngine>,
    super_role: String,
    default_tenant_id: i64,
    /// Policy revision the engine was last fully rebuilt from.
    synced_revision: AtomicI64,
    /// Serializes rebuilds.
    resync: Mutex<()>,
}

impl RoleService {
    pub fn new(
        store: Arc<dyn RbacStore>,
        policy: Arc<dyn PolicyEngine>,
        super_role: &str,
        default_tenant_id: i64,
    ) -> Self {
        Self {
            store,
            policy,
            super_role: super_role.to_string(),
            default_tenant_id,
            synced_revision: AtomicI64::new(NO_REVISION),
            resync: Mutex::new(()),
        }
    }

    pub fn super_role(&self) -> &str {
        &self.super_role
    }

    pub fn default_tenant_id(&self) -> i64 {
        self.default_tenant_id
    }

    /// Create a role granted `input.menu_ids` and everything they link to.
    ///
    /// # Errors
    /// - [`RoleError::Validation`] for a blank or overlong name, or when a
    ///   requested menu does not exist. Nothing is written.
    /// - [`RoleError::Duplicate`] when the name is taken, including a
    ///   concurrent create that commits first.
    /// - [`RoleError::Storage`] for any other storage failure; the
    ///   transaction rolls back.
    pub async fn create_role_with_menus(&self, input: RoleInput) -> Result<Role, RoleError> {
        const CONTEXT: &str = "role creation failed";
        let name = validate_name(&input.name)?;
        if self
            .store
            .find_role_by_name(&name)
            .await
            .map_err(RoleError::storage(CONTEXT))?
            .is_some()
        {
            return Err(RoleError::Duplicate(name));
        }
        let menu_ids = self.validate_menus(&input.menu_ids, CONTEXT).await?;
        let tenant_id = input.tenant_id.unwrap_or(self.default_tenant_id);

        let (role, permissions) = self
            .create_in_tx(&name, tenant_id, &menu_ids)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => RoleError::Duplicate(name.clone()),
                source => RoleError::Storage {
                    context: CONTEXT,
                    source,
                },
            })?;
        tracing::info!(
            role_id = role.id,
            role = %role.name,
            menus = menu_ids.len(),
            permissions = permissions.len(),
            "role created"
        );

        self.add_rules(&role, &permissions).await;
        Ok(role)
    }

    async fn create_in_tx(
        &self,
        name: &str,
        tenant_id: i64,
        menu_ids: &[i64],
    ) -> StoreResult<(Role, Vec<PermissionRecord>)> {
        let mut tx = self.store.begin().await?;
        let role = tx.insert_role(name, tenant_id).await?;
        tx.insert_role_menus(role.id, menu_ids).await?;
        let permissions = grant_menu_permissions(tx.as_mut(), role.id, menu_ids).await?;
        tx.bump_policy_revision().await?;
        tx.commit().await?;
        Ok((role, permissions))
    }

    /// Rename/retenant role `id` and replace its menu grants.
    ///
    /// The policy side is replaced wholesale after commit: rules for the old
    /// subject and domain are removed, then the new set is added.
    pub async fn update_role_with_menus(
        &self,
        id: i64,
        input: RoleInput,
    ) -> Result<Role, RoleError> {
        const CONTEXT: &str = "role update failed";
        let name = validate_name(&input.name)?;
        let existing = self.load_role(id, CONTEXT).await?;
        if existing.name == self.super_role && name != self.super_role {
            return Err(RoleError::Forbidden(format!(
                "role {} cannot be renamed",
                self.super_role
            )));
        }
        if name != existing.name
            && self
                .store
                .find_role_by_name(&name)
                .await
                .map_err(RoleError::storage(CONTEXT))?
                .is_some()
        {
            return Err(RoleError::Duplicate(name));
        }
        let menu_ids = self.validate_menus(&input.menu_ids, CONTEXT).await?;
        let tenant_id = input.tenant_id.unwrap_or(existing.tenant_id);

        let (role, permissions) = self
            .update_in_tx(id, &name, tenant_id, &menu_ids)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => RoleError::Duplicate(name.clone()),
                StoreError::NotFound(_) => RoleError::NotFound(format!("role {id} not found")),
                source => RoleError::Storage {
                    context: CONTEXT,
                    source,
                },
            })?;
        tracing::info!(
            role_id = role.id,
            role = %role.name,
            menus = menu_ids.len(),
            permissions = permissions.len(),
            "role updated"
        );

        self.remove_rules(&existing).await;
        if existing.name != role.name || existing.tenant_id != role.tenant_id {
            self.remove_rules(&role).await;
        }
        self.add_rules(&role, &permissions).await;
        Ok(role)
    }

    async fn update_in_tx(
        &self,
        id: i64,
        name: &str,
        tenant_id: i64,
        menu_ids: &[i64],
    ) -> StoreResult<(Role, Vec<PermissionRecord>)> {
        let mut tx = self.store.begin().await?;
        let role = tx.update_role(id, name, tenant_id).await?;
        tx.delete_role_menus(id).await?;
        tx.insert_role_menus(id, menu_ids).await?;
        tx.delete_role_permissions(id).await?;
        let permissions = grant_menu_permissions(tx.as_mut(), id, menu_ids).await?;
        tx.bump_policy_revision().await?;
        tx.commit().await?;
        Ok((role, permissions))
    }

    /// Delete role `id` with its menu and permission grants.
    pub async fn delete_role(&self, id: i64) -> Result<(), RoleError> {
        const CONTEXT: &str = "role deletion failed";
        let role = self.load_role(id, CONTEXT).await?;
        if role.name == self.super_role {
            return Err(RoleError::Forbidden(format!(
                "role {} cannot be deleted",
                self.super_role
            )));
        }

        let result: StoreResult<()> = async {
            let mut tx = self.store.begin().await?;
            tx.delete_role_menus(id).await?;
            tx.delete_role_permissions(id).await?;
            tx.delete_role(id).await?;
            tx.bump_policy_revision().await?;
            tx.commit().await
        }
        .await;
        result.map_err(|err| match err {
            StoreError::NotFound(_) => RoleError::NotFound(format!("role {id} not found")),
            source => RoleError::Storage {
                context: CONTEXT,
                source,
            },
        })?;
        tracing::info!(role_id = id, role = %role.name, "role deleted");

        self.remove_rules(&role).await;
        Ok(())
    }

    pub async fn get_role(&self, id: i64) -> Result<RoleDetail, RoleError> {
        const CONTEXT: &str = "role lookup failed";
        let role = self.load_role(id, CONTEXT).await?;
        let menu_ids = self
            .store
            .role_menu_ids(id)
            .await
            .map_err(RoleError::storage(CONTEXT))?;
        let permissions = self
            .store
            .role_permissions(id)
            .await
            .map_err(RoleError::storage(CONTEXT))?;
        Ok(RoleDetail {
            role,
            menu_ids,
            permissions,
        })
    }

    pub async fn page_roles(&self, filter: &RoleFilter) -> Result<RolePage, RoleError> {
        self.store
            .page_roles(filter)
            .await
            .map_err(RoleError::storage("role listing failed"))
    }

    /// Rebuild every role's rule set from relational state and drop role
    /// subjects that no longer have a role. Returns the number of roles whose
    /// rules were rewritten without error.
    ///
    /// # Errors
    /// - [`RoleError::Storage`] if roles or their grants cannot be read. Policy
    ///   failures are logged, counted, and skipped.
    pub async fn resync_policies(&self) -> Result<usize, RoleError> {
        let _guard = self.resync.lock().await;
        let revision = match self.store.policy_revision().await {
            Ok(revision) => Some(revision),
            Err(err) => {
                tracing::warn!(error = %err, "policy revision unavailable");
                None
            }
        };
        let rebuild = self.rebuild_policies().await?;
        if let Some(revision) = revision {
            if rebuild.is_complete() {
                self.synced_revision.store(revision, Ordering::Release);
            }
        }
        Ok(rebuild.synced)
    }

    /// Resync if the stored policy revision moved since the last full
    /// rebuild. Returns whether a rebuild ran.
    ///
    /// # Errors
    /// - [`RoleError::Storage`] if the revision, roles or grants cannot be
    ///   read.
    pub async fn sync_policies_if_stale(&self) -> Result<bool, RoleError> {
        const CONTEXT: &str = "policy revision check failed";
        let current = self
            .store
            .policy_revision()
            .await
            .map_err(RoleError::storage(CONTEXT))?;
        if self.synced_revision.load(Ordering::Acquire) == current {
            return Ok(false);
        }
        let _guard = self.resync.lock().await;
        // Another request may have rebuilt while this one waited.
        let current = self
            .store
            .policy_revision()
            .await
            .map_err(RoleError::storage(CONTEXT))?;
        if self.synced_revision.load(Ordering::Acquire) == current {
            return Ok(false);
        }
        let rebuild = self.rebuild_policies().await?;
        if rebuild.is_complete() {
            self.synced_revision.store(current, Ordering::Release);
        }
        tracing::debug!(
            revision = current,
            roles = rebuild.roles,
            synced = rebuild.synced,
            "policy engine refreshed"
        );
        Ok(true)
    }

    async fn rebuild_policies(&self) -> Result<Rebuild, RoleError> {
        const CONTEXT: &str = "policy resync failed";
        let roles = self
            .store
            .list_roles()
            .await
            .map_err(RoleError::storage(CONTEXT))?;
        let mut live = HashSet::new();
        let mut synced = 0;
        let mut orphans_removed = true;
        for role in &roles {
            let permissions = self
                .store
                .role_permissions(role.id)
                .await
                .map_err(RoleError::storage(CONTEXT))?;
            let subject = role_subject(&role.name);
            let replaced = match self.policy.remove_subject(&subject).await {
                Ok(()) => self.try_add_rules(role, &permissions).await,
                Err(err) => Err(err),
            };
            match replaced {
                Ok(()) => synced += 1,
                Err(err) => record_policy_failure("resync", &subject, &err),
            }
            live.insert(subject);
        }

        match self.policy.subjects().await {
            Ok(subjects) => {
                for subject in subjects {
                    if role_name_from_subject(&subject).is_none() || live.contains(&subject) {
                        continue;
                    }
                    match self.policy.remove_subject(&subject).await {
                        Ok(()) => {
                            tracing::info!(subject = %subject, "removed rules of deleted role");
                        }
                        Err(err) => {
                            orphans_removed = false;
                            record_policy_failure("resync", &subject, &err);
                        }
                    }
                }
            }
            Err(err) => {
                orphans_removed = false;
                record_policy_failure("resync", "*", &err);
            }
        }
        tracing::debug!(roles = roles.len(), synced, "policy resync finished");
        Ok(Rebuild {
            roles: roles.len(),
            synced,
            orphans_removed,
        })
    }

    async fn load_role(&self, id: i64, context: &'static str) -> Result<Role, RoleError> {
        match self.store.get_role(id).await {
            Ok(role) => Ok(role),
            Err(StoreError::NotFound(_)) => {
                Err(RoleError::NotFound(format!("role {id} not found")))
            }
            Err(source) => Err(RoleError::Storage { context, source }),
        }
    }

    /// Deduplicated menu ids, all of which exist.
    async fn validate_menus(
        &self,
        menu_ids: &[i64],
        context: &'static str,
    ) -> Result<Vec<i64>, RoleError> {
        let ids: Vec<i64> = menu_ids
            .iter()
            .copied()
            .collect::<BTreeSet<i64>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        let found = self
            .store
            .count_menus(&ids)
            .await
            .map_err(RoleError::storage(context))?;
        if found != ids.len() as u64 {
            return Err(RoleError::Validation(
                "one or more requested menus do not exist".to_string(),
            ));
        }
        Ok(ids)
    }

    async fn try_add_rules(
        &self,
        role: &Role,
        permissions: &[PermissionRecord],
    ) -> Result<(), AuthzError> {
        if permissions.is_empty() {
            return Ok(());
        }
        let rules: Vec<PolicyRule> = permissions
            .iter()
            .map(|permission| PolicyRule::new(&permission.path, &permission.method))
            .collect();
        self.policy
            .add_rules_for_subject(
                &role_subject(&role.name),
                &tenant_domain(role.tenant_id),
                &rules,
            )
            .await
    }

    async fn add_rules(&self, role: &Role, permissions: &[PermissionRecord]) {
        if let Err(err) = self.try_add_rules(role, permissions).await {
            record_policy_failure("add", &role_subject(&role.name), &err);
        }
    }

    async fn remove_rules(&self, role: &Role) {
        let subject = role_subject(&role.name);
        if let Err(err) = self
            .policy
            .remove_rules_for_subject(&subject, &tenant_domain(role.tenant_id))
            .await
        {
            record_policy_failure("remove", &subject, &err);
        }
    }
}

struct Rebuild {
    roles: usize,
    /// Roles whose rules were rewritten without error.
    synced: usize,
    orphans_removed: bool,
}

impl Rebuild {
    fn is_complete(&self) -> bool {
        self.orphans_removed && self.synced == self.roles
    }
}

/// Resolve the permissions behind `menu_ids` and link them to `role_id`.
async fn grant_menu_permissions(
    tx: &mut dyn RbacTx,
    role_id: i64,
    menu_ids: &[i64],
) -> StoreResult<Vec<PermissionRecord>> {
    let permissions = tx.permissions_for_menus(menu_ids).await?;
    let ids: Vec<i64> = permissions.iter().map(|permission| permission.id).collect();
    tx.insert_role_permissions(role_id, &ids).await?;
    Ok(permissions)
}

fn validate_name(raw: &str) -> Result<String, RoleError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RoleError::Validation("role name is required".to_string()));
    }
    if name.chars().count() > MAX_ROLE_NAME_CHARS {
        return Err(RoleError::Validation(format!(
            "role name must be at most {MAX_ROLE_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

fn record_policy_failure(op: &'static str, subject: &str, err: &AuthzError) {
    metrics::counter!("adminplane_policy_sync_failures_total", "op" => op).increment(1);
    tracing::error!(
        op,
        subject,
        error = %err,
        "policy engine update failed; rules lag relational state until the next resync"
    );
}
