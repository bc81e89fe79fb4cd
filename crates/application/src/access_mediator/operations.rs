use std::future::Future;
use std::sync::Arc;

use custodian_core::{AppError, AppResult};
use custodian_domain::ResourceRef;

use crate::{AccessGrant, ResourcePayload, ResourceStore, WriteReceipt};

/// Result of undoing an operation after its audit record could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The effect was undone.
    RolledBack,
    /// The operation cannot be undone and must be reconciled.
    NotSupported,
}

/// Work performed on a protected resource under an access grant.
pub trait ResourceOperation: Send {
    /// Value returned to the caller on success.
    type Output: Send;

    /// Runs the operation. Implementations must touch only what `grant` allows.
    fn execute(
        &mut self,
        grant: &AccessGrant,
    ) -> impl Future<Output = AppResult<Self::Output>> + Send;

    /// Undoes a completed execution.
    fn roll_back(&mut self) -> impl Future<Output = AppResult<RollbackOutcome>> + Send {
        async { Ok(RollbackOutcome::NotSupported) }
    }
}

/// Reads the granted fields of the target resource.
pub struct ReadOperation {
    store: Arc<dyn ResourceStore>,
}

impl ReadOperation {
    /// Creates a read against `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

impl ResourceOperation for ReadOperation {
    type Output = ResourcePayload;

    async fn execute(&mut self, grant: &AccessGrant) -> AppResult<ResourcePayload> {
        let payload = self
            .store
            .read(&grant.resource, &grant.granted_fields)
            .await?;
        Ok(payload.restricted_to(&grant.granted_fields))
    }
}

/// Writes field values to the target resource and can revert the write.
pub struct WriteOperation {
    store: Arc<dyn ResourceStore>,
    payload: Option<ResourcePayload>,
    receipt: Option<WriteReceipt>,
}

impl WriteOperation {
    /// Creates a write of `payload` against `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, payload: ResourcePayload) -> Self {
        Self {
            store,
            payload: Some(payload),
            receipt: None,
        }
    }
}

impl ResourceOperation for WriteOperation {
    type Output = WriteReceipt;

    async fn execute(&mut self, grant: &AccessGrant) -> AppResult<WriteReceipt> {
        let payload = self
            .payload
            .take()
            .ok_or_else(|| AppError::Internal("write operation already executed".to_owned()))?;
        let receipt = self.store.write(&grant.resource, payload).await?;
        self.receipt = Some(receipt.clone());
        Ok(receipt)
    }

    async fn roll_back(&mut self) -> AppResult<RollbackOutcome> {
        let Some(receipt) = self.receipt.take() else {
            return Ok(RollbackOutcome::RolledBack);
        };

        if self.store.revert_write(&receipt).await? {
            Ok(RollbackOutcome::RolledBack)
        } else {
            Ok(RollbackOutcome::NotSupported)
        }
    }
}

/// Deletes the target resource on a caller's request.
pub struct DeleteOperation {
    store: Arc<dyn ResourceStore>,
}

impl DeleteOperation {
    /// Creates a delete against `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

impl ResourceOperation for DeleteOperation {
    type Output = ResourceRef;

    async fn execute(&mut self, grant: &AccessGrant) -> AppResult<ResourceRef> {
        self.store.delete(&grant.resource).await?;
        Ok(grant.resource.clone())
    }
}

/// Adapts a one-shot closure into a [`ResourceOperation`] without rollback.
pub struct FnOperation<F> {
    operation: Option<F>,
}

impl<F> FnOperation<F> {
    /// Wraps `operation`.
    #[must_use]
    pub fn new<Fut>(operation: F) -> Self
    where
        F: FnOnce(AccessGrant) -> Fut,
    {
        Self {
            operation: Some(operation),
        }
    }
}

impl<F, Fut, T> ResourceOperation for FnOperation<F>
where
    F: FnOnce(AccessGrant) -> Fut + Send,
    Fut: Future<Output = AppResult<T>> + Send,
    T: Send,
{
    type Output = T;

    async fn execute(&mut self, grant: &AccessGrant) -> AppResult<T> {
        let operation = self
            .operation
            .take()
            .ok_or_else(|| AppError::Internal("operation already executed".to_owned()))?;
        operation(grant.clone()).await
    }
}
