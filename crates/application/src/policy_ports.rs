use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_core::{AppResult, PrincipalId};
use custodian_domain::{
    AccessAction, AuditRetentionPolicy, Principal, RetentionClass, RetentionPolicy, RoleName,
    RoleVersion,
};

/// Point-in-time view of externally supplied policy state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    current_roles: BTreeMap<RoleName, RoleVersion>,
    retention_policies: Vec<RetentionPolicy>,
    direct_subject_actions: BTreeSet<AccessAction>,
    audit_retention: AuditRetentionPolicy,
}

impl PolicySnapshot {
    /// Builds a snapshot. Only the highest version of each role is kept.
    #[must_use]
    pub fn new(
        role_versions: Vec<RoleVersion>,
        retention_policies: Vec<RetentionPolicy>,
        direct_subject_actions: BTreeSet<AccessAction>,
        audit_retention: AuditRetentionPolicy,
    ) -> Self {
        let mut current_roles: BTreeMap<RoleName, RoleVersion> = BTreeMap::new();
        for role in role_versions {
            let is_newer = current_roles
                .get(role.name())
                .is_none_or(|current| current.version() < role.version());
            if is_newer {
                current_roles.insert(role.name().clone(), role);
            }
        }

        Self {
            current_roles,
            retention_policies,
            direct_subject_actions,
            audit_retention,
        }
    }

    /// Returns the current version of one role.
    #[must_use]
    pub fn current_role(&self, name: &RoleName) -> Option<&RoleVersion> {
        self.current_roles.get(name)
    }

    /// Returns the current versions of every role a principal holds.
    #[must_use]
    pub fn roles_for(&self, principal: &Principal) -> Vec<&RoleVersion> {
        principal
            .roles()
            .iter()
            .filter_map(|name| self.current_roles.get(name))
            .collect()
    }

    /// Returns the next free version number for a role.
    #[must_use]
    pub fn next_role_version(&self, name: &RoleName) -> u32 {
        self.current_roles
            .get(name)
            .map_or(1, |role| role.version().saturating_add(1))
    }

    /// Returns every retention policy version.
    #[must_use]
    pub fn retention_policies(&self) -> &[RetentionPolicy] {
        &self.retention_policies
    }

    /// Returns the retention policy version in effect for a class at `at`.
    #[must_use]
    pub fn retention_policy_in_effect(
        &self,
        class: &RetentionClass,
        at: DateTime<Utc>,
    ) -> Option<&RetentionPolicy> {
        RetentionPolicy::in_effect(&self.retention_policies, class, at)
    }

    /// Returns the next free version number for a retention class.
    #[must_use]
    pub fn next_retention_version(&self, class: &RetentionClass) -> u32 {
        self.retention_policies
            .iter()
            .filter(|policy| policy.class() == class)
            .map(RetentionPolicy::version)
            .max()
            .map_or(1, |version| version.saturating_add(1))
    }

    /// Returns whether the resource subject may perform `action` on their own
    /// records without the minimum-necessary filter.
    #[must_use]
    pub fn is_direct_subject_action(&self, action: AccessAction) -> bool {
        self.direct_subject_actions.contains(&action)
    }

    /// Returns retention applied to the audit trail.
    #[must_use]
    pub fn audit_retention(&self) -> AuditRetentionPolicy {
        self.audit_retention
    }
}

/// Repository port for versioned, append-only policy tables.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Loads the full policy state.
    async fn load_snapshot(&self) -> AppResult<PolicySnapshot>;

    /// Appends one role version. An existing (name, version) pair conflicts.
    async fn append_role_version(&self, role: RoleVersion) -> AppResult<()>;

    /// Appends one retention policy version. An existing (class, version) pair conflicts.
    async fn append_retention_policy(&self, policy: RetentionPolicy) -> AppResult<()>;
}

/// Directory of principals.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Finds one principal.
    async fn find_principal(&self, principal_id: PrincipalId) -> AppResult<Option<Principal>>;

    /// Inserts or replaces one principal.
    async fn save_principal(&self, principal: Principal) -> AppResult<()>;
}
