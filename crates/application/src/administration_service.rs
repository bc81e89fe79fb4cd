use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId, RequestContext};
use custodian_domain::{
    AccessAction, DispositionAction, FieldSet, LegalHold, Permission, Principal, ResourceRef,
    ResourceType, RetentionClass, RetentionPolicy, RoleName, RoleVersion,
};
use serde::Deserialize;

use crate::{
    AccessMediator, AccessRequest, FnOperation, PolicyCache, PolicyRepository,
    PrincipalDirectory, ResourceMetadataRepository,
};

/// Input for placing a legal hold.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaceLegalHoldInput {
    /// Reason recorded on the hold.
    pub reason: NonEmptyString,
    /// Optional review date. Passing it never lifts the hold.
    pub review_at: Option<DateTime<Utc>>,
}

/// Input for appending a role version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppendRoleVersionInput {
    /// Role name.
    pub name: RoleName,
    /// Granted permissions.
    pub permissions: BTreeSet<Permission>,
    /// Field entitlements per resource type.
    #[serde(default)]
    pub field_entitlements: BTreeMap<ResourceType, FieldSet>,
}

/// Input for appending a retention policy version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppendRetentionPolicyInput {
    /// Retention class.
    pub retention_class: RetentionClass,
    /// Retention duration in years.
    pub duration_years: u16,
    /// Terminal handling.
    pub disposition: DispositionAction,
    /// When the version takes effect.
    pub effective_from: DateTime<Utc>,
}

/// Administrative operations. Every call is mediated and audited.
#[derive(Clone)]
pub struct AdministrationService {
    mediator: AccessMediator,
    metadata: Arc<dyn ResourceMetadataRepository>,
    directory: Arc<dyn PrincipalDirectory>,
    policies: Arc<dyn PolicyRepository>,
    policy_cache: PolicyCache,
}

impl AdministrationService {
    /// Creates the administration service.
    #[must_use]
    pub fn new(
        mediator: AccessMediator,
        metadata: Arc<dyn ResourceMetadataRepository>,
        directory: Arc<dyn PrincipalDirectory>,
        policies: Arc<dyn PolicyRepository>,
        policy_cache: PolicyCache,
    ) -> Self {
        Self {
            mediator,
            metadata,
            directory,
            policies,
            policy_cache,
        }
    }

    /// Places a legal hold on a live resource.
    pub async fn place_legal_hold(
        &self,
        context: &RequestContext,
        resource: ResourceRef,
        input: PlaceLegalHoldInput,
    ) -> AppResult<LegalHold> {
        let metadata = self.metadata.clone();
        let placed_by = context.principal_id();
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::LegalHoldPlace, resource),
                FnOperation::new(move |grant| async move {
                    let current = metadata
                        .find_metadata(&grant.resource)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("resource '{}' not found", grant.resource))
                        })?;
                    let hold = LegalHold::new(input.reason, placed_by, Utc::now(), input.review_at);
                    let mut target = current.clone();
                    target.place_legal_hold(hold.clone())?;
                    if !metadata.replace_metadata(&current, target).await? {
                        return Err(concurrent_change(&grant.resource));
                    }
                    tracing::info!(resource = %grant.resource, "legal hold placed");
                    Ok(hold)
                }),
            )
            .await
    }

    /// Lifts the legal hold on a live resource. Lifting is the only way a
    /// hold ends.
    pub async fn lift_legal_hold(
        &self,
        context: &RequestContext,
        resource: ResourceRef,
    ) -> AppResult<LegalHold> {
        let metadata = self.metadata.clone();
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::LegalHoldLift, resource),
                FnOperation::new(move |grant| async move {
                    let current = metadata
                        .find_metadata(&grant.resource)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("resource '{}' not found", grant.resource))
                        })?;
                    let mut target = current.clone();
                    let hold = target.lift_legal_hold()?;
                    if !metadata.replace_metadata(&current, target).await? {
                        return Err(concurrent_change(&grant.resource));
                    }
                    tracing::info!(resource = %grant.resource, "legal hold lifted");
                    Ok(hold)
                }),
            )
            .await
    }

    /// Permanently deactivates a principal.
    pub async fn deactivate_principal(
        &self,
        context: &RequestContext,
        principal_id: PrincipalId,
    ) -> AppResult<Principal> {
        let directory = self.directory.clone();
        let target = ResourceRef::configuration("principal", principal_id.to_string().as_str())?;
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::PrincipalDeactivate, target),
                FnOperation::new(move |_grant| async move {
                    let mut principal = directory
                        .find_principal(principal_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("principal '{principal_id}' not found"))
                        })?;
                    principal.deactivate()?;
                    directory.save_principal(principal.clone()).await?;
                    tracing::info!(principal_id = %principal_id, "principal deactivated");
                    Ok(principal)
                }),
            )
            .await
    }

    /// Appends the next version of a role and applies it immediately.
    pub async fn append_role_version(
        &self,
        context: &RequestContext,
        input: AppendRoleVersionInput,
    ) -> AppResult<RoleVersion> {
        let policies = self.policies.clone();
        let policy_cache = self.policy_cache.clone();
        let target = ResourceRef::configuration("role", input.name.as_str())?;
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::RolePolicyUpdate, target),
                FnOperation::new(move |_grant| async move {
                    let snapshot = policies.load_snapshot().await?;
                    let role = RoleVersion::new(
                        input.name.clone(),
                        snapshot.next_role_version(&input.name),
                        input.permissions,
                        input.field_entitlements,
                    )?;
                    policies.append_role_version(role.clone()).await?;
                    policy_cache.invalidate().await;
                    tracing::info!(role = %role.version_ref(), "role version appended");
                    Ok(role)
                }),
            )
            .await
    }

    /// Appends the next version of a retention policy.
    ///
    /// The audit trail's own retention must still cover the longest resource
    /// retention once the new version is included.
    pub async fn append_retention_policy(
        &self,
        context: &RequestContext,
        input: AppendRetentionPolicyInput,
    ) -> AppResult<RetentionPolicy> {
        let policies = self.policies.clone();
        let policy_cache = self.policy_cache.clone();
        let target =
            ResourceRef::configuration("retention_policy", input.retention_class.as_str())?;
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::RetentionPolicyUpdate, target),
                FnOperation::new(move |_grant| async move {
                    let snapshot = policies.load_snapshot().await?;
                    let policy = RetentionPolicy::new(
                        input.retention_class.clone(),
                        snapshot.next_retention_version(&input.retention_class),
                        input.duration_years,
                        input.disposition,
                        input.effective_from,
                    )?;

                    let mut all_policies = snapshot.retention_policies().to_vec();
                    all_policies.push(policy.clone());
                    snapshot
                        .audit_retention()
                        .validate_against(&all_policies)?;

                    policies.append_retention_policy(policy.clone()).await?;
                    policy_cache.invalidate().await;
                    tracing::info!(
                        retention_class = policy.class().as_str(),
                        version = policy.version(),
                        "retention policy appended"
                    );
                    Ok(policy)
                }),
            )
            .await
    }
}

fn concurrent_change(resource: &ResourceRef) -> AppError {
    AppError::Conflict(format!(
        "resource '{resource}' changed concurrently; retry the request"
    ))
}
