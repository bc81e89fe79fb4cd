use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use custodian_application::{
    AccessMediator, AccessRequest, AuditLogStore, AuditQuery, AuditRecorder, AuditRetryPolicy,
    AuditTierStore, AuthorizationService, PolicyCache, PolicyRepository, PrincipalDirectory,
    ReadOperation, ResourceMetadataRepository, ResourcePayload, ResourceStore,
    audit_record_stream, verify_chain,
};
use custodian_core::{
    AppError, ChannelTag, CorrelationId, NonEmptyString, PrincipalId, RequestContext,
};
use custodian_domain::{
    AccessAction, AuditEntry, AuditOutcome, FieldName, Permission, Principal, ResourceMetadata,
    ResourceRef, ResourceType, RetentionClass, RoleName, RoleVersion,
};
use serde_json::Value;

use crate::{
    InMemoryPolicyRepository, InMemoryPrincipalDirectory, InMemoryReconciliationQueue,
    InMemoryResourceMetadataRepository, InMemoryResourceStore, TracingAlertNotifier,
};

use super::InMemoryAuditLogStore;

fn resource(resource_id: &str) -> ResourceRef {
    match ResourceRef::parse("patient_record", resource_id) {
        Ok(reference) => reference,
        Err(error) => panic!("invalid resource: {error}"),
    }
}

fn channel() -> ChannelTag {
    match ChannelTag::new("clinical-web") {
        Ok(channel) => channel,
        Err(error) => panic!("invalid channel: {error}"),
    }
}

fn field(name: &str) -> FieldName {
    match FieldName::new(name) {
        Ok(field) => field,
        Err(error) => panic!("invalid field: {error}"),
    }
}

fn entry(resource: ResourceRef, correlation_id: CorrelationId) -> AuditEntry {
    AuditEntry::new(
        PrincipalId::new(),
        Vec::new(),
        AccessAction::PhiRead,
        resource,
        AuditOutcome::Success,
        channel(),
        correlation_id,
    )
}

async fn append(store: &InMemoryAuditLogStore, entry: AuditEntry) {
    if let Err(error) = store.append(entry).await {
        panic!("append failed: {error}");
    }
}

async fn mediator_over(
    audit: Arc<InMemoryAuditLogStore>,
    resources: &[ResourceRef],
) -> (AccessMediator, Arc<InMemoryResourceStore>, PrincipalId) {
    let role_name = match RoleName::new("nurse") {
        Ok(role_name) => role_name,
        Err(error) => panic!("invalid role: {error}"),
    };
    let resource_type = match ResourceType::new("patient_record") {
        Ok(resource_type) => resource_type,
        Err(error) => panic!("invalid resource type: {error}"),
    };
    let role = match RoleVersion::new(
        role_name.clone(),
        1,
        BTreeSet::from([Permission::ReadPatientSummary]),
        BTreeMap::from([(resource_type, [field("name")].into_iter().collect())]),
    ) {
        Ok(role) => role,
        Err(error) => panic!("invalid role version: {error}"),
    };
    let policies = Arc::new(InMemoryPolicyRepository::new());
    if let Err(error) = policies.append_role_version(role).await {
        panic!("role append failed: {error}");
    }

    let handle = match NonEmptyString::new("nurse-1") {
        Ok(handle) => handle,
        Err(error) => panic!("invalid handle: {error}"),
    };
    let principal = match Principal::new(PrincipalId::new(), handle, BTreeSet::from([role_name])) {
        Ok(principal) => principal,
        Err(error) => panic!("invalid principal: {error}"),
    };
    let principal_id = principal.id();
    let directory = Arc::new(InMemoryPrincipalDirectory::new());
    if let Err(error) = directory.save_principal(principal).await {
        panic!("principal save failed: {error}");
    }

    let class = match RetentionClass::new("clinical") {
        Ok(class) => class,
        Err(error) => panic!("invalid class: {error}"),
    };
    let metadata = Arc::new(InMemoryResourceMetadataRepository::new());
    let store = Arc::new(InMemoryResourceStore::new());
    for reference in resources {
        let saved = metadata
            .save_metadata(ResourceMetadata::new(
                reference.clone(),
                Utc::now(),
                None,
                class.clone(),
                None,
            ))
            .await;
        if let Err(error) = saved {
            panic!("metadata save failed: {error}");
        }
        let payload = ResourcePayload::new(BTreeMap::from([(
            field("name"),
            Value::String("Jordan".to_owned()),
        )]));
        if let Err(error) = store.write(reference, payload).await {
            panic!("content write failed: {error}");
        }
    }

    let retry = match AuditRetryPolicy::new(3, Duration::from_millis(1)) {
        Ok(retry) => retry,
        Err(error) => panic!("invalid retry policy: {error}"),
    };
    let mediator = AccessMediator::new(
        AuthorizationService::new(
            directory,
            metadata,
            PolicyCache::new(policies, Duration::from_secs(60)),
        ),
        AuditRecorder::new(audit, Arc::new(TracingAlertNotifier), retry),
        Arc::new(InMemoryReconciliationQueue::new()),
        Duration::from_secs(5),
    );

    (mediator, store, principal_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reads_produce_gapless_verifiable_streams() {
    let audit = Arc::new(InMemoryAuditLogStore::new());
    let resources: Vec<ResourceRef> = (0..10)
        .map(|index| resource(&format!("pr-{index}")))
        .collect();
    let (mediator, store, principal_id) = mediator_over(audit.clone(), &resources).await;

    let mut tasks = Vec::with_capacity(10_000);
    for index in 0..10_000_usize {
        let mediator = mediator.clone();
        let store = store.clone();
        let reference = resources[index % resources.len()].clone();
        tasks.push(tokio::spawn(async move {
            let context = RequestContext::new(principal_id, channel(), CorrelationId::new());
            let request = AccessRequest::new(AccessAction::PhiRead, reference)
                .with_fields([field("name")].into_iter().collect());
            mediator
                .mediate(&context, request, ReadOperation::new(store))
                .await
        }));
    }
    for task in tasks {
        match task.await {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => panic!("mediated read failed: {error}"),
            Err(error) => panic!("read task panicked: {error}"),
        }
    }

    for reference in &resources {
        let records = audit.stream_records(reference).await;
        assert_eq!(records.len(), 1_000);
        let sequences: Vec<u64> = records.iter().map(|record| record.sequence()).collect();
        let expected: Vec<u64> = (1..=1_000).collect();
        assert_eq!(sequences, expected);

        let stream = audit_record_stream(
            audit.clone(),
            AuditQuery::ByResource(reference.clone()),
            None,
            250,
        );
        let verification = match verify_chain(reference.clone(), stream).await {
            Ok(verification) => verification,
            Err(error) => panic!("verification failed: {error}"),
        };
        assert_eq!(verification.records_checked, 1_000);
        assert_eq!(verification.first_break, None);
    }
}

#[tokio::test]
async fn repeated_correlation_id_returns_the_original_receipt() {
    let store = InMemoryAuditLogStore::new();
    let correlation_id = CorrelationId::new();

    let first = match store.append(entry(resource("pr-1"), correlation_id)).await {
        Ok(receipt) => receipt,
        Err(error) => panic!("append failed: {error}"),
    };
    let second = match store.append(entry(resource("pr-1"), correlation_id)).await {
        Ok(receipt) => receipt,
        Err(error) => panic!("append failed: {error}"),
    };

    assert_eq!(first, second);
    assert_eq!(store.stream_records(&resource("pr-1")).await.len(), 1);
}

#[tokio::test]
async fn correlation_id_reused_for_another_resource_is_a_conflict() {
    let store = InMemoryAuditLogStore::new();
    let correlation_id = CorrelationId::new();
    append(&store, entry(resource("pr-1"), correlation_id)).await;

    let reused = store.append(entry(resource("pr-2"), correlation_id)).await;

    assert!(matches!(reused, Err(AppError::Conflict(_))));
    assert!(store.stream_records(&resource("pr-2")).await.is_empty());
}

#[tokio::test]
async fn mediated_read_reusing_a_correlation_id_fails_closed() {
    let audit = Arc::new(InMemoryAuditLogStore::new());
    let resources = [resource("pr-a"), resource("pr-b")];
    let (mediator, store, principal_id) = mediator_over(audit.clone(), &resources).await;
    let context = RequestContext::new(principal_id, channel(), CorrelationId::new());

    let mut outcomes = Vec::new();
    for reference in &resources {
        let request = AccessRequest::new(AccessAction::PhiRead, reference.clone())
            .with_fields([field("name")].into_iter().collect());
        outcomes.push(
            mediator
                .mediate(&context, request, ReadOperation::new(store.clone()))
                .await,
        );
    }

    assert!(outcomes[0].is_ok());
    assert!(matches!(outcomes[1], Err(AppError::AuditWriteFailure(_))));
    assert_eq!(audit.stream_records(&resources[0]).await.len(), 1);
    assert!(audit.stream_records(&resources[1]).await.is_empty());
}

#[tokio::test]
async fn recorded_at_never_decreases() {
    let store = InMemoryAuditLogStore::new();
    for index in 0..20 {
        append(&store, entry(resource(&format!("pr-{}", index % 3)), CorrelationId::new())).await;
    }

    let records = match store.list_hot_after(None, 100).await {
        Ok(records) => records,
        Err(error) => panic!("hot listing failed: {error}"),
    };

    assert_eq!(records.len(), 20);
    assert!(
        records
            .windows(2)
            .all(|pair| pair[0].recorded_at() <= pair[1].recorded_at())
    );
}

#[tokio::test]
async fn cold_records_stay_queryable_and_retained_streams_survive_purge() {
    let store = InMemoryAuditLogStore::new();
    for _ in 0..2 {
        append(&store, entry(resource("pr-1"), CorrelationId::new())).await;
        append(&store, entry(resource("pr-2"), CorrelationId::new())).await;
    }
    let later = Utc::now() + TimeDelta::seconds(1);

    let moved = match store.transition_to_cold(later).await {
        Ok(moved) => moved,
        Err(error) => panic!("tier transition failed: {error}"),
    };
    assert_eq!(moved, 4);
    match store.list_hot_after(None, 10).await {
        Ok(records) => assert!(records.is_empty()),
        Err(error) => panic!("hot listing failed: {error}"),
    }
    match store
        .query(&AuditQuery::ByResource(resource("pr-1")), None, 10)
        .await
    {
        Ok(page) => assert_eq!(page.records.len(), 2),
        Err(error) => panic!("query failed: {error}"),
    }

    let purged = match store.purge_expired(later, &[resource("pr-2")]).await {
        Ok(purged) => purged,
        Err(error) => panic!("purge failed: {error}"),
    };
    assert_eq!(purged, 2);
    assert!(store.stream_records(&resource("pr-1")).await.is_empty());
    assert_eq!(store.stream_records(&resource("pr-2")).await.len(), 2);
}

#[tokio::test]
async fn query_pages_resume_after_cursor() {
    let store = InMemoryAuditLogStore::new();
    for _ in 0..5 {
        append(&store, entry(resource("pr-1"), CorrelationId::new())).await;
    }
    let query = AuditQuery::ByResource(resource("pr-1"));

    let first = match store.query(&query, None, 3).await {
        Ok(page) => page,
        Err(error) => panic!("query failed: {error}"),
    };
    assert_eq!(first.records.len(), 3);
    let second = match store.query(&query, first.next_cursor, 3).await {
        Ok(page) => page,
        Err(error) => panic!("query failed: {error}"),
    };

    let sequences: Vec<u64> = second.records.iter().map(|record| record.sequence()).collect();
    assert_eq!(sequences, vec![4, 5]);
    assert_eq!(second.next_cursor, None);
}
