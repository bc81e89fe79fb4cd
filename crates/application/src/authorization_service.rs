use std::collections::BTreeSet;
use std::sync::Arc;

use custodian_core::{AppResult, PrincipalId};
use custodian_domain::{
    AccessAction, FailureCode, FieldSet, Principal, ResourceMetadata, ResourceRef, RoleVersionRef,
};

use crate::{PolicyCache, PolicySnapshot, PrincipalDirectory, ResourceMetadataRepository};

/// Action a principal asks to perform on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Requested action.
    pub action: AccessAction,
    /// Target resource or configuration object.
    pub resource: ResourceRef,
    /// Fields the caller asks for.
    pub requested_fields: FieldSet,
}

impl AccessRequest {
    /// Creates a request without field selection.
    #[must_use]
    pub fn new(action: AccessAction, resource: ResourceRef) -> Self {
        Self {
            action,
            resource,
            requested_fields: FieldSet::new(),
        }
    }

    /// Sets the requested fields.
    #[must_use]
    pub fn with_fields(mut self, requested_fields: FieldSet) -> Self {
        self.requested_fields = requested_fields;
        self
    }
}

/// Ephemeral authorization result. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    /// Evaluated principal.
    pub principal_id: PrincipalId,
    /// Evaluated action.
    pub action: AccessAction,
    /// Evaluated target.
    pub resource: ResourceRef,
    /// Fields the caller asked for.
    pub requested_fields: FieldSet,
    /// Minimum-necessary subset of the requested fields.
    pub granted_fields: FieldSet,
    /// Denial reason, absent when allowed.
    pub denial: Option<FailureCode>,
    /// Current role versions held by the principal.
    pub roles: Vec<RoleVersionRef>,
}

impl AuthorizationDecision {
    fn denied(principal_id: PrincipalId, request: &AccessRequest, denial: FailureCode) -> Self {
        Self {
            principal_id,
            action: request.action,
            resource: request.resource.clone(),
            requested_fields: request.requested_fields.clone(),
            granted_fields: FieldSet::new(),
            denial: Some(denial),
            roles: Vec::new(),
        }
    }

    /// Returns whether the action may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.denial.is_none()
    }

    /// Returns the grant handed to the operation when allowed.
    #[must_use]
    pub fn grant(&self) -> Option<AccessGrant> {
        self.is_allowed().then(|| AccessGrant {
            principal_id: self.principal_id,
            action: self.action,
            resource: self.resource.clone(),
            granted_fields: self.granted_fields.clone(),
        })
    }
}

/// What an allowed operation may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Acting principal.
    pub principal_id: PrincipalId,
    /// Allowed action.
    pub action: AccessAction,
    /// Allowed target.
    pub resource: ResourceRef,
    /// Fields the operation may read.
    pub granted_fields: FieldSet,
}

/// Evaluates one request against a policy snapshot.
///
/// Pure: every lookup has already happened. Unknown and inactive principals
/// are denied before anything else is considered.
#[must_use]
pub fn evaluate(
    principal_id: PrincipalId,
    principal: Option<&Principal>,
    snapshot: &PolicySnapshot,
    request: &AccessRequest,
    resource: Option<&ResourceMetadata>,
) -> AuthorizationDecision {
    let Some(principal) = principal else {
        return AuthorizationDecision::denied(principal_id, request, FailureCode::PrincipalUnknown);
    };

    if !principal.is_active() {
        return AuthorizationDecision::denied(
            principal_id,
            request,
            FailureCode::PrincipalInactive,
        );
    }

    let roles = snapshot.roles_for(principal);
    let role_refs: Vec<RoleVersionRef> = roles.iter().map(|role| role.version_ref()).collect();

    let permitted = request.action.required_permission().is_some_and(|permission| {
        roles
            .iter()
            .any(|role| role.permissions().contains(&permission))
    });
    if !permitted {
        let mut decision =
            AuthorizationDecision::denied(principal_id, request, FailureCode::NotPermitted);
        decision.roles = role_refs;
        return decision;
    }

    if request.action.requires_live_resource()
        && resource.is_none_or(|metadata| {
            metadata.is_disposed() || metadata.reference() != &request.resource
        })
    {
        let mut decision =
            AuthorizationDecision::denied(principal_id, request, FailureCode::ResourceUnavailable);
        decision.roles = role_refs;
        return decision;
    }

    let is_subject =
        resource.is_some_and(|metadata| metadata.owner() == Some(principal_id));
    let granted_fields = if !request.action.reads_fields()
        || is_subject
        || snapshot.is_direct_subject_action(request.action)
    {
        request.requested_fields.clone()
    } else {
        let resource_type = request.resource.resource_type();
        let entitled: BTreeSet<_> = roles
            .iter()
            .filter_map(|role| role.entitled_fields(resource_type))
            .flatten()
            .collect();
        request
            .requested_fields
            .iter()
            .filter(|field| entitled.contains(field))
            .cloned()
            .collect()
    };

    AuthorizationDecision {
        principal_id,
        action: request.action,
        resource: request.resource.clone(),
        requested_fields: request.requested_fields.clone(),
        granted_fields,
        denial: None,
        roles: role_refs,
    }
}

/// Application service performing the lookups behind one decision.
#[derive(Clone)]
pub struct AuthorizationService {
    directory: Arc<dyn PrincipalDirectory>,
    metadata: Arc<dyn ResourceMetadataRepository>,
    policy_cache: PolicyCache,
}

impl AuthorizationService {
    /// Creates a new authorization service.
    #[must_use]
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>,
        metadata: Arc<dyn ResourceMetadataRepository>,
        policy_cache: PolicyCache,
    ) -> Self {
        Self {
            directory,
            metadata,
            policy_cache,
        }
    }

    /// Decides one request.
    ///
    /// Principal, policy and resource lookups all run before evaluation, so a
    /// missing resource and a refused principal share one code path.
    pub async fn decide(
        &self,
        principal_id: PrincipalId,
        request: &AccessRequest,
    ) -> AppResult<AuthorizationDecision> {
        let principal = self.directory.find_principal(principal_id).await?;
        let snapshot = self.policy_cache.snapshot().await?;
        let resource = if request.action.requires_live_resource() {
            self.metadata.find_metadata(&request.resource).await?
        } else {
            None
        };

        let decision = evaluate(
            principal_id,
            principal.as_ref(),
            &snapshot,
            request,
            resource.as_ref(),
        );
        if let Some(denial) = decision.denial {
            tracing::debug!(
                principal_id = %principal_id,
                action = request.action.as_str(),
                resource = %request.resource,
                denial = denial.as_str(),
                "access denied"
            );
        }

        Ok(decision)
    }

    /// Returns the policy cache backing this service.
    #[must_use]
    pub fn policy_cache(&self) -> &PolicyCache {
        &self.policy_cache
    }
}

#[cfg(test)]
mod tests;
