use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use custodian_core::{AppError, CorrelationId, PrincipalId};
use custodian_domain::{
    AccessAction, AuditEntry, AuditOutcome, AuditRecord, GENESIS_HASH, Permission, Principal,
    ResourceRef,
};
use futures::TryStreamExt;

use crate::test_fakes::{
    FakeAlertNotifier, FakeAuditLogStore, FakeMetadataRepository, FakePolicyRepository,
    FakePrincipalDirectory, FakeReconciliationQueue, channel, context, principal, resource,
    role_version,
};
use crate::{
    AccessMediator, AuditLogStore, AuditQuery, AuditRecorder, AuditRetryPolicy,
    AuthorizationService, PolicyCache,
};

use super::{AuditQueryService, ChainBreakKind, audit_record_stream, verify_chain};

fn entry(reference: &ResourceRef) -> AuditEntry {
    AuditEntry::new(
        PrincipalId::new(),
        Vec::new(),
        AccessAction::PhiRead,
        reference.clone(),
        AuditOutcome::Success,
        channel(),
        CorrelationId::new(),
    )
}

async fn seeded_store(count: usize) -> Arc<FakeAuditLogStore> {
    let store = Arc::new(FakeAuditLogStore::default());
    let reference = resource("patient_record", "pr-1");
    for _ in 0..count {
        assert!(store.append(entry(&reference)).await.is_ok());
    }
    store
}

async fn service(store: Arc<FakeAuditLogStore>) -> (AuditQueryService, Principal, Principal) {
    let auditor = principal(&["auditor"]);
    let nurse = principal(&["nurse"]);
    let directory = Arc::new(FakePrincipalDirectory::default());
    directory.insert(auditor.clone()).await;
    directory.insert(nurse.clone()).await;

    let policies = Arc::new(FakePolicyRepository::default());
    policies
        .push_role(role_version("auditor", 1, &[Permission::ViewAuditTrail], &[]))
        .await;
    policies
        .push_role(role_version(
            "nurse",
            1,
            &[Permission::ReadPatientSummary],
            &[],
        ))
        .await;

    let mediator = AccessMediator::new(
        AuthorizationService::new(
            directory,
            Arc::new(FakeMetadataRepository::default()),
            PolicyCache::new(policies, Duration::from_secs(5)),
        ),
        AuditRecorder::new(
            store.clone(),
            Arc::new(FakeAlertNotifier::default()),
            AuditRetryPolicy::default(),
        ),
        Arc::new(FakeReconciliationQueue::default()),
        Duration::from_secs(5),
    );

    (AuditQueryService::new(mediator, store), auditor, nurse)
}

#[tokio::test]
async fn stream_walks_every_page_in_order() {
    let store = seeded_store(7).await;

    let records: Vec<AuditRecord> = match audit_record_stream(
        store,
        AuditQuery::ByResource(resource("patient_record", "pr-1")),
        None,
        3,
    )
    .try_collect()
    .await
    {
        Ok(records) => records,
        Err(error) => panic!("stream failed: {error}"),
    };

    let ids: Vec<u64> = records.iter().map(AuditRecord::record_id).collect();
    assert_eq!(ids, (1..=7).collect::<Vec<u64>>());
}

#[tokio::test]
async fn stream_restarts_from_cursor() {
    let store = seeded_store(5).await;

    let records: Vec<AuditRecord> = match audit_record_stream(
        store,
        AuditQuery::ByResource(resource("patient_record", "pr-1")),
        Some(3),
        2,
    )
    .try_collect()
    .await
    {
        Ok(records) => records,
        Err(error) => panic!("stream failed: {error}"),
    };

    let ids: Vec<u64> = records.iter().map(AuditRecord::record_id).collect();
    assert_eq!(ids, vec![4, 5]);
}

#[tokio::test]
async fn verification_detects_tampered_record() {
    let store = seeded_store(3).await;
    let reference = resource("patient_record", "pr-1");
    let mut records = store.records().await;

    let intact = verify_chain(
        reference.clone(),
        futures::stream::iter(records.clone().into_iter().map(Ok)),
    )
    .await;
    assert!(matches!(intact, Ok(ref report) if report.first_break.is_none() && report.records_checked == 3));

    let original = records.remove(1);
    let tampered = AuditRecord::restore(
        original.record_id(),
        original.sequence(),
        original.recorded_at(),
        original
            .entry()
            .clone()
            .with_outcome(AuditOutcome::Denied(custodian_domain::FailureCode::NotPermitted)),
        original.previous_hash().to_owned(),
        original.hash().to_owned(),
    );
    records.insert(1, tampered);

    let report = match verify_chain(reference, futures::stream::iter(records.into_iter().map(Ok)))
        .await
    {
        Ok(report) => report,
        Err(error) => panic!("verification failed: {error}"),
    };
    let first_break = report.first_break.map(|chain_break| (chain_break.record_id, chain_break.kind));
    assert_eq!(first_break, Some((2, ChainBreakKind::HashMismatch)));
}

#[tokio::test]
async fn verification_detects_sequence_gap() {
    let reference = resource("patient_record", "pr-1");
    let first = match AuditRecord::seal(1, 1, Utc::now(), entry(&reference), GENESIS_HASH.to_owned())
    {
        Ok(record) => record,
        Err(error) => panic!("failed to seal: {error}"),
    };
    let third = match AuditRecord::seal(2, 3, Utc::now(), entry(&reference), first.hash().to_owned())
    {
        Ok(record) => record,
        Err(error) => panic!("failed to seal: {error}"),
    };

    let report = verify_chain(
        reference,
        futures::stream::iter(vec![Ok(first), Ok(third)]),
    )
    .await;
    assert!(matches!(
        report,
        Ok(ref report) if report.first_break.as_ref().map(|chain_break| chain_break.kind)
            == Some(ChainBreakKind::SequenceGap)
    ));
}

#[tokio::test]
async fn history_is_authorized_and_audited() {
    let store = seeded_store(2).await;
    let (service, auditor, _) = service(store.clone()).await;
    let context = context(auditor.id());

    let page = service
        .history(
            &context,
            AuditQuery::ByResource(resource("patient_record", "pr-1")),
            None,
            50,
        )
        .await;

    assert!(matches!(page, Ok(ref page) if page.records.len() == 2 && page.next_cursor.is_none()));
    let view = match store.find_by_correlation(context.correlation_id()).await {
        Ok(Some(record)) => record,
        other => panic!("expected audit-trail-view record, got {other:?}"),
    };
    assert_eq!(view.entry().action(), AccessAction::AuditTrailView);
    assert_eq!(view.entry().outcome(), AuditOutcome::Success);
}

#[tokio::test]
async fn history_without_permission_is_denied() {
    let store = seeded_store(1).await;
    let (service, _, nurse) = service(store.clone()).await;

    let page = service
        .history(
            &context(nurse.id()),
            AuditQuery::ByPrincipal(nurse.id()),
            None,
            50,
        )
        .await;

    assert!(matches!(page, Err(AppError::AccessDenied)));
    assert_eq!(store.records().await.len(), 2);
}

#[tokio::test]
async fn oversized_page_is_rejected() {
    let store = seeded_store(0).await;
    let (service, auditor, _) = service(store).await;

    let page = service
        .history(
            &context(auditor.id()),
            AuditQuery::ByPrincipal(auditor.id()),
            None,
            10_000,
        )
        .await;
    assert!(matches!(page, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn verify_resource_chain_reports_intact_stream() {
    let store = seeded_store(4).await;
    let (service, auditor, _) = service(store).await;

    let report = service
        .verify_resource_chain(&context(auditor.id()), resource("patient_record", "pr-1"))
        .await;
    assert!(matches!(
        report,
        Ok(ref report) if report.first_break.is_none() && report.records_checked == 4
    ));
}
