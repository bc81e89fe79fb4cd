use std::sync::Arc;
use std::time::Duration;

use custodian_core::{AppError, CorrelationId, PrincipalId};
use custodian_domain::{AccessAction, AuditEntry, AuditOutcome, OperationalEvent};

use crate::AlertEvent;
use crate::test_fakes::{FakeAlertNotifier, FakeAuditLogStore, channel, resource};

use super::{AuditRecorder, AuditRetryPolicy};

fn entry(correlation_id: CorrelationId) -> AuditEntry {
    AuditEntry::new(
        PrincipalId::new(),
        Vec::new(),
        AccessAction::PhiRead,
        resource("patient_record", "pr-1"),
        AuditOutcome::Success,
        channel(),
        correlation_id,
    )
}

fn recorder(
    store: Arc<FakeAuditLogStore>,
    notifier: Arc<FakeAlertNotifier>,
) -> AuditRecorder {
    let retry = match AuditRetryPolicy::new(3, Duration::from_millis(10)) {
        Ok(retry) => retry,
        Err(error) => panic!("invalid retry policy: {error}"),
    };
    AuditRecorder::new(store, notifier, retry)
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let store = Arc::new(FakeAuditLogStore::default());
    let notifier = Arc::new(FakeAlertNotifier::default());
    store.fail_next(2).await;

    let receipt = recorder(store.clone(), notifier.clone())
        .record(entry(CorrelationId::new()))
        .await;

    assert!(receipt.is_ok());
    assert_eq!(store.append_attempts().await, 3);
    assert_eq!(store.records().await.len(), 1);
    assert!(notifier.events.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_escalate_and_fail() {
    let store = Arc::new(FakeAuditLogStore::default());
    let notifier = Arc::new(FakeAlertNotifier::default());
    store.fail_next(5).await;
    let correlation_id = CorrelationId::new();

    let result = recorder(store.clone(), notifier.clone())
        .record(entry(correlation_id))
        .await;

    assert!(matches!(result, Err(AppError::AuditWriteFailure(_))));
    assert_eq!(store.append_attempts().await, 3);
    let events = notifier.events.lock().await;
    assert!(matches!(
        events.first(),
        Some(AlertEvent::Operational(OperationalEvent::AuditWriteFailed { correlation_id: id, .. }))
            if *id == correlation_id
    ));
}

#[tokio::test]
async fn same_correlation_id_returns_original_receipt() {
    let store = Arc::new(FakeAuditLogStore::default());
    let notifier = Arc::new(FakeAlertNotifier::default());
    let recorder = recorder(store.clone(), notifier);
    let correlation_id = CorrelationId::new();

    let first = recorder.record(entry(correlation_id)).await;
    let second = recorder.record(entry(correlation_id)).await;

    assert!(first.is_ok());
    assert_eq!(first.ok(), second.ok());
    assert_eq!(store.records().await.len(), 1);
}
