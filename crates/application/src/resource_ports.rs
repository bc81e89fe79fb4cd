use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_core::{AppResult, CorrelationId, PrincipalId};
use custodian_domain::{AccessAction, FieldName, FieldSet, ResourceMetadata, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field values exchanged with the external resource store.
///
/// Payloads flow between the store and the mediated operation only. No audit
/// type accepts them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePayload {
    fields: BTreeMap<FieldName, Value>,
}

impl ResourcePayload {
    /// Creates a payload from field values.
    #[must_use]
    pub fn new(fields: BTreeMap<FieldName, Value>) -> Self {
        Self { fields }
    }

    /// Returns the field values.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<FieldName, Value> {
        &self.fields
    }

    /// Returns the names of the fields present.
    #[must_use]
    pub fn field_names(&self) -> FieldSet {
        self.fields.keys().cloned().collect()
    }

    /// Drops every field outside `granted`.
    #[must_use]
    pub fn restricted_to(mut self, granted: &FieldSet) -> Self {
        self.fields.retain(|name, _| granted.contains(name));
        self
    }
}

/// Store acknowledgement for a completed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// Written resource.
    pub reference: ResourceRef,
    /// Store-assigned revision used to revert the write.
    pub revision: String,
}

/// External store holding protected resource content.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Reads the requested fields of one resource.
    async fn read(&self, reference: &ResourceRef, fields: &FieldSet)
    -> AppResult<ResourcePayload>;

    /// Writes field values to one resource.
    async fn write(
        &self,
        reference: &ResourceRef,
        payload: ResourcePayload,
    ) -> AppResult<WriteReceipt>;

    /// Reverts a completed write. Returns false when the store cannot revert.
    async fn revert_write(&self, _receipt: &WriteReceipt) -> AppResult<bool> {
        Ok(false)
    }

    /// Irreversibly deletes one resource. Deleting an absent resource succeeds.
    async fn delete(&self, reference: &ResourceRef) -> AppResult<()>;

    /// Moves one resource to cold archival storage.
    async fn archive(&self, reference: &ResourceRef) -> AppResult<()>;
}

/// Repository port for engine-owned resource metadata.
#[async_trait]
pub trait ResourceMetadataRepository: Send + Sync {
    /// Finds metadata for one resource.
    async fn find_metadata(&self, reference: &ResourceRef) -> AppResult<Option<ResourceMetadata>>;

    /// Inserts or replaces metadata for one resource.
    async fn save_metadata(&self, metadata: ResourceMetadata) -> AppResult<()>;

    /// Replaces metadata only while the stored lifecycle state, legal hold
    /// and parent still match `expected`. Returns `false` when another
    /// writer got there first.
    async fn replace_metadata(
        &self,
        expected: &ResourceMetadata,
        metadata: ResourceMetadata,
    ) -> AppResult<bool>;

    /// Lists metadata ordered by reference, strictly after `after`.
    async fn list_metadata_batch(
        &self,
        after: Option<&ResourceRef>,
        limit: usize,
    ) -> AppResult<Vec<ResourceMetadata>>;

    /// Lists resources whose parent is `parent`.
    async fn list_dependents(&self, parent: &ResourceRef) -> AppResult<Vec<ResourceMetadata>>;

    /// Lists every resource currently under legal hold.
    async fn list_held_references(&self) -> AppResult<Vec<ResourceRef>>;
}

/// Completed operation whose audit record could not be written nor rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    /// Affected resource.
    pub resource: ResourceRef,
    /// Action performed.
    pub action: AccessAction,
    /// Acting principal.
    pub principal_id: PrincipalId,
    /// Correlation id of the call.
    pub correlation_id: CorrelationId,
    /// When the item was flagged.
    pub flagged_at: DateTime<Utc>,
}

/// Queue of unaudited operations awaiting manual reconciliation.
#[async_trait]
pub trait ReconciliationQueue: Send + Sync {
    /// Flags one operation.
    async fn enqueue(&self, item: ReconciliationItem) -> AppResult<()>;
}
