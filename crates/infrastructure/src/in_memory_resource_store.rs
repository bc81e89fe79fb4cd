use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use custodian_application::{ResourcePayload, ResourceStore, WriteReceipt};
use custodian_core::{AppError, AppResult};
use custodian_domain::{FieldSet, ResourceRef};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoredResource {
    revisions: Vec<ResourcePayload>,
}

/// In-memory resource store keeping every revision so writes can be reverted.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<BTreeMap<ResourceRef, StoredResource>>,
    archived: RwLock<BTreeSet<ResourceRef>>,
}

impl InMemoryResourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a resource was moved to archival storage.
    pub async fn is_archived(&self, reference: &ResourceRef) -> bool {
        self.archived.read().await.contains(reference)
    }

    /// Returns whether live content exists for a resource.
    pub async fn contains(&self, reference: &ResourceRef) -> bool {
        self.resources.read().await.contains_key(reference)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn read(
        &self,
        reference: &ResourceRef,
        fields: &FieldSet,
    ) -> AppResult<ResourcePayload> {
        let resources = self.resources.read().await;
        let current = resources
            .get(reference)
            .and_then(|stored| stored.revisions.last())
            .ok_or_else(|| AppError::NotFound(format!("resource '{reference}' has no content")))?;
        Ok(current.clone().restricted_to(fields))
    }

    async fn write(
        &self,
        reference: &ResourceRef,
        payload: ResourcePayload,
    ) -> AppResult<WriteReceipt> {
        let mut resources = self.resources.write().await;
        let stored = resources.entry(reference.clone()).or_default();
        let mut fields = stored
            .revisions
            .last()
            .map(|current| current.fields().clone())
            .unwrap_or_default();
        fields.extend(payload.fields().clone());
        stored.revisions.push(ResourcePayload::new(fields));

        Ok(WriteReceipt {
            reference: reference.clone(),
            revision: stored.revisions.len().to_string(),
        })
    }

    async fn revert_write(&self, receipt: &WriteReceipt) -> AppResult<bool> {
        let mut resources = self.resources.write().await;
        let Some(stored) = resources.get_mut(&receipt.reference) else {
            return Ok(false);
        };
        if stored.revisions.len().to_string() != receipt.revision {
            return Ok(false);
        }

        stored.revisions.pop();
        if stored.revisions.is_empty() {
            resources.remove(&receipt.reference);
        }
        Ok(true)
    }

    async fn delete(&self, reference: &ResourceRef) -> AppResult<()> {
        self.resources.write().await.remove(reference);
        Ok(())
    }

    async fn archive(&self, reference: &ResourceRef) -> AppResult<()> {
        self.resources.write().await.remove(reference);
        self.archived.write().await.insert(reference.clone());
        Ok(())
    }
}
