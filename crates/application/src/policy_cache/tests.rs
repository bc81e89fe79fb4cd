use std::sync::Arc;
use std::time::Duration;

use custodian_domain::Permission;

use crate::test_fakes::{FakePolicyRepository, role, role_version};

use super::PolicyCache;

#[tokio::test(start_paused = true)]
async fn snapshot_is_reused_within_staleness_bound() {
    let repository = Arc::new(FakePolicyRepository::default());
    repository
        .push_role(role_version("nurse", 1, &[Permission::ReadPatientSummary], &[]))
        .await;
    let cache = PolicyCache::new(repository.clone(), Duration::from_secs(5));

    assert!(cache.snapshot().await.is_ok());
    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(cache.snapshot().await.is_ok());

    assert_eq!(repository.load_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn snapshot_older_than_bound_is_reloaded() {
    let repository = Arc::new(FakePolicyRepository::default());
    let cache = PolicyCache::new(repository.clone(), Duration::from_secs(5));

    assert!(cache.snapshot().await.is_ok());
    repository
        .push_role(role_version("nurse", 2, &[Permission::WritePatientRecord], &[]))
        .await;
    tokio::time::advance(Duration::from_secs(6)).await;

    let snapshot = match cache.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(error) => panic!("snapshot failed: {error}"),
    };
    assert_eq!(repository.load_count().await, 2);
    assert_eq!(snapshot.next_role_version(&role("nurse")), 3);
}

#[tokio::test(start_paused = true)]
async fn invalidate_applies_role_change_immediately() {
    let repository = Arc::new(FakePolicyRepository::default());
    let cache = PolicyCache::new(repository.clone(), Duration::from_secs(300));

    assert!(cache.snapshot().await.is_ok());
    repository
        .push_role(role_version("auditor", 1, &[Permission::ViewAuditTrail], &[]))
        .await;
    cache.invalidate().await;

    let snapshot = match cache.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(error) => panic!("snapshot failed: {error}"),
    };
    assert!(
        snapshot
            .current_role(&role("auditor"))
            .is_some()
    );
    assert_eq!(repository.load_count().await, 2);
}
