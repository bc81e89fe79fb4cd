use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use custodian_core::PrincipalId;
use custodian_domain::{
    AccessAction, AuditRetentionPolicy, DispositionState, FailureCode, Permission, Principal,
};

use crate::test_fakes::{
    FakeMetadataRepository, FakePolicyRepository, FakePrincipalDirectory, fields, metadata,
    principal, resource, role_version,
};
use crate::{PolicyCache, PolicySnapshot};

use super::{AccessRequest, AuthorizationService, evaluate};

fn snapshot(direct_subject_actions: BTreeSet<AccessAction>) -> PolicySnapshot {
    PolicySnapshot::new(
        vec![
            role_version(
                "nurse",
                1,
                &[Permission::ReadPatientSummary],
                &[("patient_record", &["a", "b", "c"])],
            ),
            role_version(
                "nurse",
                2,
                &[Permission::ReadPatientSummary],
                &[("patient_record", &["a", "b"])],
            ),
        ],
        Vec::new(),
        direct_subject_actions,
        AuditRetentionPolicy::default(),
    )
}

fn read_request() -> AccessRequest {
    AccessRequest::new(AccessAction::PhiRead, resource("patient_record", "pr-1"))
        .with_fields(fields(&["a", "b", "c"]))
}

#[test]
fn unknown_principal_is_denied() {
    let decision = evaluate(
        PrincipalId::new(),
        None,
        &snapshot(BTreeSet::new()),
        &read_request(),
        None,
    );
    assert_eq!(decision.denial, Some(FailureCode::PrincipalUnknown));
    assert!(decision.grant().is_none());
}

#[test]
fn inactive_principal_is_denied_even_with_permissions() {
    let mut nurse = principal(&["nurse"]);
    assert!(nurse.deactivate().is_ok());
    let target = metadata(resource("patient_record", "pr-1"), None, Utc::now(), None);

    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &snapshot(BTreeSet::new()),
        &read_request(),
        Some(&target),
    );
    assert_eq!(decision.denial, Some(FailureCode::PrincipalInactive));
}

#[test]
fn missing_permission_is_not_permitted() {
    let nurse = principal(&["nurse"]);
    let request = AccessRequest::new(AccessAction::PhiDelete, resource("patient_record", "pr-1"));
    let target = metadata(resource("patient_record", "pr-1"), None, Utc::now(), None);

    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &snapshot(BTreeSet::new()),
        &request,
        Some(&target),
    );
    assert_eq!(decision.denial, Some(FailureCode::NotPermitted));
    assert_eq!(decision.roles.len(), 1);
}

#[test]
fn current_role_version_limits_fields_to_entitlement() {
    let nurse = principal(&["nurse"]);
    let target = metadata(resource("patient_record", "pr-1"), None, Utc::now(), None);

    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &snapshot(BTreeSet::new()),
        &read_request(),
        Some(&target),
    );

    assert!(decision.is_allowed());
    assert_eq!(decision.granted_fields, fields(&["a", "b"]));
    assert_eq!(decision.roles.first().map(|role| role.version), Some(2));
}

#[test]
fn owner_and_direct_subject_actions_bypass_field_filter() {
    let nurse = principal(&["nurse"]);
    let owned = metadata(
        resource("patient_record", "pr-1"),
        Some(nurse.id()),
        Utc::now(),
        None,
    );
    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &snapshot(BTreeSet::new()),
        &read_request(),
        Some(&owned),
    );
    assert_eq!(decision.granted_fields, fields(&["a", "b", "c"]));

    let unowned = metadata(resource("patient_record", "pr-1"), None, Utc::now(), None);
    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &snapshot(BTreeSet::from([AccessAction::PhiRead])),
        &read_request(),
        Some(&unowned),
    );
    assert_eq!(decision.granted_fields, fields(&["a", "b", "c"]));
}

#[test]
fn missing_and_disposed_resources_are_unavailable() {
    let nurse = principal(&["nurse"]);
    let policies = snapshot(BTreeSet::new());

    let missing = evaluate(nurse.id(), Some(&nurse), &policies, &read_request(), None);
    assert_eq!(missing.denial, Some(FailureCode::ResourceUnavailable));

    let mut disposed = metadata(resource("patient_record", "pr-1"), None, Utc::now(), None);
    for next in [
        DispositionState::EligibleForDisposition,
        DispositionState::DispositionInProgress,
    ] {
        assert!(disposed.transition_to(next).is_ok());
    }
    assert!(disposed.transition_to(DispositionState::Deleted).is_ok());
    let decision = evaluate(
        nurse.id(),
        Some(&nurse),
        &policies,
        &read_request(),
        Some(&disposed),
    );
    assert_eq!(decision.denial, Some(FailureCode::ResourceUnavailable));
}

async fn service_with(principal: &Principal) -> (AuthorizationService, Arc<FakeMetadataRepository>) {
    let directory = Arc::new(FakePrincipalDirectory::default());
    directory.insert(principal.clone()).await;
    let repository = Arc::new(FakePolicyRepository::default());
    repository
        .push_role(role_version(
            "auditor",
            1,
            &[Permission::ViewAuditTrail],
            &[],
        ))
        .await;
    let metadata_repository = Arc::new(FakeMetadataRepository::default());
    let service = AuthorizationService::new(
        directory,
        metadata_repository.clone(),
        PolicyCache::new(repository, Duration::from_secs(5)),
    );
    (service, metadata_repository)
}

#[tokio::test]
async fn configuration_targets_need_no_metadata() {
    let auditor = principal(&["auditor"]);
    let (service, _) = service_with(&auditor).await;
    let request = AccessRequest::new(
        AccessAction::AuditTrailView,
        resource("config.audit_trail", "time-range"),
    );

    let decision = match service.decide(auditor.id(), &request).await {
        Ok(decision) => decision,
        Err(error) => panic!("decision failed: {error}"),
    };
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn decide_looks_up_live_resources() {
    let auditor = principal(&["auditor"]);
    let (service, metadata_repository) = service_with(&auditor).await;
    metadata_repository
        .insert(metadata(
            resource("patient_record", "pr-9"),
            None,
            Utc::now(),
            None,
        ))
        .await;

    let request = AccessRequest::new(AccessAction::PhiRead, resource("patient_record", "pr-9"));
    let decision = match service.decide(auditor.id(), &request).await {
        Ok(decision) => decision,
        Err(error) => panic!("decision failed: {error}"),
    };
    assert_eq!(decision.denial, Some(FailureCode::NotPermitted));
}
