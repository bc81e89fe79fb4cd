use async_trait::async_trait;
use custodian_core::AppResult;

/// Distributed lease claimed by the active retention scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerLease {
    /// Lease key.
    pub scope_key: String,
    /// Holder identifier.
    pub holder_id: String,
    /// Ownership token used for compare-and-delete.
    pub token: String,
}

/// Distributed coordination port ensuring a single active scheduler.
#[async_trait]
pub trait SchedulerLeaseCoordinator: Send + Sync {
    /// Attempts to acquire the lease for the given scope.
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<SchedulerLease>>;

    /// Releases the lease using token compare-and-delete semantics.
    async fn release_lease(&self, lease: &SchedulerLease) -> AppResult<()>;

    /// Renews the lease and returns false when token ownership changed.
    async fn renew_lease(&self, lease: &SchedulerLease, lease_seconds: u32) -> AppResult<bool>;
}
