use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use custodian_application::{PolicyRepository, PolicySnapshot, PrincipalDirectory};
use custodian_core::{AppError, AppResult, PrincipalId};
use custodian_domain::{
    AccessAction, AuditRetentionPolicy, Principal, RetentionPolicy, RoleVersion,
};
use tokio::sync::RwLock;

/// In-memory versioned policy tables.
#[derive(Debug, Default)]
pub struct InMemoryPolicyRepository {
    roles: RwLock<Vec<RoleVersion>>,
    retention_policies: RwLock<Vec<RetentionPolicy>>,
    direct_subject_actions: RwLock<BTreeSet<AccessAction>>,
    audit_retention: RwLock<AuditRetentionPolicy>,
}

impl InMemoryPolicyRepository {
    /// Creates an empty repository with the default audit retention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows an action on resources whose owner is the caller.
    pub async fn allow_direct_subject_action(&self, action: AccessAction) {
        self.direct_subject_actions.write().await.insert(action);
    }

    /// Replaces the audit trail retention.
    pub async fn set_audit_retention(&self, retention: AuditRetentionPolicy) {
        *self.audit_retention.write().await = retention;
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn load_snapshot(&self) -> AppResult<PolicySnapshot> {
        Ok(PolicySnapshot::new(
            self.roles.read().await.clone(),
            self.retention_policies.read().await.clone(),
            self.direct_subject_actions.read().await.clone(),
            *self.audit_retention.read().await,
        ))
    }

    async fn append_role_version(&self, role: RoleVersion) -> AppResult<()> {
        let mut roles = self.roles.write().await;
        if roles
            .iter()
            .any(|existing| existing.version_ref() == role.version_ref())
        {
            return Err(AppError::Conflict(format!(
                "role version '{}' already exists",
                role.version_ref()
            )));
        }

        roles.push(role);
        Ok(())
    }

    async fn append_retention_policy(&self, policy: RetentionPolicy) -> AppResult<()> {
        let mut policies = self.retention_policies.write().await;
        if policies.iter().any(|existing| {
            existing.class() == policy.class() && existing.version() == policy.version()
        }) {
            return Err(AppError::Conflict(format!(
                "retention policy '{}' version {} already exists",
                policy.class().as_str(),
                policy.version()
            )));
        }

        policies.push(policy);
        Ok(())
    }
}

/// In-memory principal directory.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalDirectory {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
}

impl InMemoryPrincipalDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn find_principal(&self, principal_id: PrincipalId) -> AppResult<Option<Principal>> {
        Ok(self.principals.read().await.get(&principal_id).cloned())
    }

    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        self.principals
            .write()
            .await
            .insert(principal.id(), principal);
        Ok(())
    }
}
