use std::collections::BTreeMap;

use async_trait::async_trait;
use custodian_application::ResourceMetadataRepository;
use custodian_core::AppResult;
use custodian_domain::{ResourceMetadata, ResourceRef};
use tokio::sync::RwLock;

/// In-memory resource metadata repository ordered by reference.
#[derive(Debug, Default)]
pub struct InMemoryResourceMetadataRepository {
    resources: RwLock<BTreeMap<ResourceRef, ResourceMetadata>>,
}

impl InMemoryResourceMetadataRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceMetadataRepository for InMemoryResourceMetadataRepository {
    async fn find_metadata(&self, reference: &ResourceRef) -> AppResult<Option<ResourceMetadata>> {
        Ok(self.resources.read().await.get(reference).cloned())
    }

    async fn save_metadata(&self, metadata: ResourceMetadata) -> AppResult<()> {
        self.resources
            .write()
            .await
            .insert(metadata.reference().clone(), metadata);
        Ok(())
    }

    async fn replace_metadata(
        &self,
        expected: &ResourceMetadata,
        metadata: ResourceMetadata,
    ) -> AppResult<bool> {
        let mut resources = self.resources.write().await;
        if resources.get(expected.reference()) != Some(expected) {
            return Ok(false);
        }

        resources.insert(metadata.reference().clone(), metadata);
        Ok(true)
    }

    async fn list_metadata_batch(
        &self,
        after: Option<&ResourceRef>,
        limit: usize,
    ) -> AppResult<Vec<ResourceMetadata>> {
        let resources = self.resources.read().await;
        let batch = match after {
            Some(after) => resources
                .range::<ResourceRef, _>((
                    std::ops::Bound::Excluded(after),
                    std::ops::Bound::Unbounded,
                ))
                .take(limit)
                .map(|(_, metadata)| metadata.clone())
                .collect(),
            None => resources.values().take(limit).cloned().collect(),
        };
        Ok(batch)
    }

    async fn list_dependents(&self, parent: &ResourceRef) -> AppResult<Vec<ResourceMetadata>> {
        Ok(self
            .resources
            .read()
            .await
            .values()
            .filter(|metadata| metadata.parent() == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_held_references(&self) -> AppResult<Vec<ResourceRef>> {
        Ok(self
            .resources
            .read()
            .await
            .values()
            .filter(|metadata| metadata.is_held())
            .map(|metadata| metadata.reference().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use custodian_application::ResourceMetadataRepository;
    use custodian_core::{NonEmptyString, PrincipalId};
    use custodian_domain::{LegalHold, ResourceMetadata, ResourceRef, RetentionClass};

    use super::InMemoryResourceMetadataRepository;

    fn metadata() -> ResourceMetadata {
        let reference = match ResourceRef::parse("patient_record", "pr-1") {
            Ok(reference) => reference,
            Err(error) => panic!("invalid reference: {error}"),
        };
        let class = match RetentionClass::new("clinical") {
            Ok(class) => class,
            Err(error) => panic!("invalid class: {error}"),
        };
        ResourceMetadata::new(reference, Utc::now(), None, class, None)
    }

    fn hold() -> LegalHold {
        let reason = match NonEmptyString::new("litigation") {
            Ok(reason) => reason,
            Err(error) => panic!("invalid reason: {error}"),
        };
        LegalHold::new(reason, PrincipalId::new(), Utc::now(), None)
    }

    #[tokio::test]
    async fn replace_loses_to_a_hold_written_after_the_read() {
        let repository = InMemoryResourceMetadataRepository::new();
        let read = metadata();
        assert!(repository.save_metadata(read.clone()).await.is_ok());

        let mut held = read.clone();
        assert!(held.place_legal_hold(hold()).is_ok());
        assert!(repository.save_metadata(held).await.is_ok());

        let mut detached = read.clone();
        detached.detach_from_parent();
        assert!(matches!(
            repository.replace_metadata(&read, detached).await,
            Ok(false)
        ));

        match repository.find_metadata(read.reference()).await {
            Ok(Some(stored)) => assert!(stored.is_held()),
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[tokio::test]
    async fn replace_applies_when_nothing_changed() {
        let repository = InMemoryResourceMetadataRepository::new();
        let read = metadata();
        assert!(repository.save_metadata(read.clone()).await.is_ok());

        let mut held = read.clone();
        assert!(held.place_legal_hold(hold()).is_ok());

        assert!(matches!(
            repository.replace_metadata(&read, held).await,
            Ok(true)
        ));
    }
}
