//! In-process port implementations shared by service tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_core::{
    AppError, AppResult, ChannelTag, CorrelationId, NonEmptyString, PrincipalId, RequestContext,
};
use custodian_domain::{
    AccessAction, AuditEntry, AuditRecord, AuditRetentionPolicy, AuditTier, DispositionAction,
    FieldName, FieldSet, GENESIS_HASH, LegalHold, Permission, Principal, ResourceMetadata,
    ResourceRef, ResourceType, RetentionClass, RetentionPolicy, RoleName, RoleVersion,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    AlertEvent, AlertNotifier, AuditLogStore, AuditPage, AuditQuery, AuditReceipt, AuditTierStore,
    PolicyRepository, PolicySnapshot, PrincipalDirectory, ReconciliationItem, ReconciliationQueue,
    ResourceMetadataRepository, ResourcePayload, ResourceStore, WriteReceipt,
};

pub fn role(name: &str) -> RoleName {
    match RoleName::new(name) {
        Ok(role) => role,
        Err(error) => panic!("invalid role name: {error}"),
    }
}

pub fn field(name: &str) -> FieldName {
    match FieldName::new(name) {
        Ok(field) => field,
        Err(error) => panic!("invalid field name: {error}"),
    }
}

pub fn fields(names: &[&str]) -> FieldSet {
    names.iter().map(|name| field(name)).collect()
}

pub fn resource(resource_type: &str, resource_id: &str) -> ResourceRef {
    match ResourceRef::parse(resource_type, resource_id) {
        Ok(reference) => reference,
        Err(error) => panic!("invalid resource: {error}"),
    }
}

pub fn class(name: &str) -> RetentionClass {
    match RetentionClass::new(name) {
        Ok(class) => class,
        Err(error) => panic!("invalid retention class: {error}"),
    }
}

pub fn text(value: &str) -> NonEmptyString {
    match NonEmptyString::new(value) {
        Ok(value) => value,
        Err(error) => panic!("invalid text: {error}"),
    }
}

pub fn role_version(
    name: &str,
    version: u32,
    permissions: &[Permission],
    entitlements: &[(&str, &[&str])],
) -> RoleVersion {
    let field_entitlements: BTreeMap<ResourceType, FieldSet> = entitlements
        .iter()
        .map(|(resource_type, names)| {
            let resource_type = match ResourceType::new(*resource_type) {
                Ok(resource_type) => resource_type,
                Err(error) => panic!("invalid resource type: {error}"),
            };
            (resource_type, fields(names))
        })
        .collect();

    match RoleVersion::new(
        role(name),
        version,
        permissions.iter().copied().collect(),
        field_entitlements,
    ) {
        Ok(role) => role,
        Err(error) => panic!("invalid role version: {error}"),
    }
}

pub fn principal(roles: &[&str]) -> Principal {
    let id = PrincipalId::new();
    match Principal::new(
        id,
        text("clinician"),
        roles.iter().map(|name| role(name)).collect(),
    ) {
        Ok(principal) => principal,
        Err(error) => panic!("invalid principal: {error}"),
    }
}

pub fn channel() -> ChannelTag {
    match ChannelTag::new("clinical-web") {
        Ok(channel) => channel,
        Err(error) => panic!("invalid channel: {error}"),
    }
}

pub fn context(principal_id: PrincipalId) -> RequestContext {
    RequestContext::new(principal_id, channel(), CorrelationId::new())
}

pub fn metadata(
    reference: ResourceRef,
    owner: Option<PrincipalId>,
    created_at: DateTime<Utc>,
    parent: Option<ResourceRef>,
) -> ResourceMetadata {
    ResourceMetadata::new(reference, created_at, owner, class("clinical"), parent)
}

pub fn retention_policy(
    version: u32,
    duration_years: u16,
    disposition: DispositionAction,
    effective_from: DateTime<Utc>,
) -> RetentionPolicy {
    match RetentionPolicy::new(
        class("clinical"),
        version,
        duration_years,
        disposition,
        effective_from,
    ) {
        Ok(policy) => policy,
        Err(error) => panic!("invalid retention policy: {error}"),
    }
}

#[derive(Default)]
pub struct FakePolicyRepository {
    roles: Mutex<Vec<RoleVersion>>,
    policies: Mutex<Vec<RetentionPolicy>>,
    direct_subject_actions: Mutex<BTreeSet<AccessAction>>,
    loads: Mutex<usize>,
}

impl FakePolicyRepository {
    pub async fn push_role(&self, role: RoleVersion) {
        self.roles.lock().await.push(role);
    }

    pub async fn push_policy(&self, policy: RetentionPolicy) {
        self.policies.lock().await.push(policy);
    }

    pub async fn allow_direct_subject(&self, action: AccessAction) {
        self.direct_subject_actions.lock().await.insert(action);
    }

    pub async fn load_count(&self) -> usize {
        *self.loads.lock().await
    }
}

#[async_trait]
impl PolicyRepository for FakePolicyRepository {
    async fn load_snapshot(&self) -> AppResult<PolicySnapshot> {
        *self.loads.lock().await += 1;
        Ok(PolicySnapshot::new(
            self.roles.lock().await.clone(),
            self.policies.lock().await.clone(),
            self.direct_subject_actions.lock().await.clone(),
            AuditRetentionPolicy::default(),
        ))
    }

    async fn append_role_version(&self, role: RoleVersion) -> AppResult<()> {
        let mut roles = self.roles.lock().await;
        if roles
            .iter()
            .any(|existing| existing.version_ref() == role.version_ref())
        {
            return Err(AppError::Conflict(format!(
                "role version '{}' already exists",
                role.version_ref()
            )));
        }
        roles.push(role);
        Ok(())
    }

    async fn append_retention_policy(&self, policy: RetentionPolicy) -> AppResult<()> {
        let mut policies = self.policies.lock().await;
        if policies.iter().any(|existing| {
            existing.class() == policy.class() && existing.version() == policy.version()
        }) {
            return Err(AppError::Conflict("retention policy version exists".to_owned()));
        }
        policies.push(policy);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePrincipalDirectory {
    principals: Mutex<HashMap<PrincipalId, Principal>>,
    failures_remaining: Mutex<u32>,
    lookups: Mutex<u32>,
}

impl FakePrincipalDirectory {
    pub async fn insert(&self, principal: Principal) {
        self.principals.lock().await.insert(principal.id(), principal);
    }

    pub async fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock().await = count;
    }

    pub async fn lookups(&self) -> u32 {
        *self.lookups.lock().await
    }
}

#[async_trait]
impl PrincipalDirectory for FakePrincipalDirectory {
    async fn find_principal(&self, principal_id: PrincipalId) -> AppResult<Option<Principal>> {
        *self.lookups.lock().await += 1;
        {
            let mut failures = self.failures_remaining.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Unavailable("directory offline".to_owned()));
            }
        }

        Ok(self.principals.lock().await.get(&principal_id).cloned())
    }

    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        self.principals.lock().await.insert(principal.id(), principal);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMetadataRepository {
    resources: Mutex<BTreeMap<ResourceRef, ResourceMetadata>>,
    hold_after_read: Mutex<Option<(ResourceRef, LegalHold)>>,
}

impl FakeMetadataRepository {
    pub async fn insert(&self, metadata: ResourceMetadata) {
        self.resources
            .lock()
            .await
            .insert(metadata.reference().clone(), metadata);
    }

    /// Places `hold` right after the next read of `reference` returns, as
    /// an administrator racing the reader would.
    pub async fn hold_after_next_read(&self, reference: ResourceRef, hold: LegalHold) {
        *self.hold_after_read.lock().await = Some((reference, hold));
    }

    pub async fn get(&self, reference: &ResourceRef) -> ResourceMetadata {
        match self.resources.lock().await.get(reference) {
            Some(metadata) => metadata.clone(),
            None => panic!("missing metadata for {reference}"),
        }
    }
}

#[async_trait]
impl ResourceMetadataRepository for FakeMetadataRepository {
    async fn find_metadata(&self, reference: &ResourceRef) -> AppResult<Option<ResourceMetadata>> {
        let mut resources = self.resources.lock().await;
        let found = resources.get(reference).cloned();

        let mut pending = self.hold_after_read.lock().await;
        if pending.as_ref().is_some_and(|(target, _)| target == reference)
            && let Some((_, hold)) = pending.take()
            && let Some(stored) = resources.get_mut(reference)
        {
            assert!(stored.place_legal_hold(hold).is_ok());
        }

        Ok(found)
    }

    async fn save_metadata(&self, metadata: ResourceMetadata) -> AppResult<()> {
        self.insert(metadata).await;
        Ok(())
    }

    async fn replace_metadata(
        &self,
        expected: &ResourceMetadata,
        metadata: ResourceMetadata,
    ) -> AppResult<bool> {
        let mut resources = self.resources.lock().await;
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
        Ok(self
            .resources
            .lock()
            .await
            .values()
            .filter(|metadata| after.is_none_or(|after| metadata.reference() > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_dependents(&self, parent: &ResourceRef) -> AppResult<Vec<ResourceMetadata>> {
        Ok(self
            .resources
            .lock()
            .await
            .values()
            .filter(|metadata| metadata.parent() == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_held_references(&self) -> AppResult<Vec<ResourceRef>> {
        Ok(self
            .resources
            .lock()
            .await
            .values()
            .filter(|metadata| metadata.is_held())
            .map(|metadata| metadata.reference().clone())
            .collect())
    }
}

#[derive(Default)]
pub struct FakeResourceStore {
    pub contents: Mutex<BTreeMap<ResourceRef, ResourcePayload>>,
    pub read_requests: Mutex<Vec<FieldSet>>,
    pub deleted: Mutex<Vec<ResourceRef>>,
    pub archived: Mutex<Vec<ResourceRef>>,
    pub reverted: Mutex<Vec<WriteReceipt>>,
    pub supports_revert: bool,
}

impl FakeResourceStore {
    pub async fn put(&self, reference: ResourceRef, values: &[(&str, &str)]) {
        let payload = ResourcePayload::new(
            values
                .iter()
                .map(|(name, value)| (field(name), Value::String((*value).to_owned())))
                .collect(),
        );
        self.contents.lock().await.insert(reference, payload);
    }
}

#[async_trait]
impl ResourceStore for FakeResourceStore {
    async fn read(
        &self,
        reference: &ResourceRef,
        fields: &FieldSet,
    ) -> AppResult<ResourcePayload> {
        self.read_requests.lock().await.push(fields.clone());
        let contents = self.contents.lock().await;
        let payload = contents
            .get(reference)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("resource '{reference}' is absent")))?;
        Ok(payload.restricted_to(fields))
    }

    async fn write(
        &self,
        reference: &ResourceRef,
        payload: ResourcePayload,
    ) -> AppResult<WriteReceipt> {
        self.contents
            .lock()
            .await
            .insert(reference.clone(), payload);
        Ok(WriteReceipt {
            reference: reference.clone(),
            revision: "rev-1".to_owned(),
        })
    }

    async fn revert_write(&self, receipt: &WriteReceipt) -> AppResult<bool> {
        if !self.supports_revert {
            return Ok(false);
        }
        self.contents.lock().await.remove(&receipt.reference);
        self.reverted.lock().await.push(receipt.clone());
        Ok(true)
    }

    async fn delete(&self, reference: &ResourceRef) -> AppResult<()> {
        self.contents.lock().await.remove(reference);
        self.deleted.lock().await.push(reference.clone());
        Ok(())
    }

    async fn archive(&self, reference: &ResourceRef) -> AppResult<()> {
        self.contents.lock().await.remove(reference);
        self.archived.lock().await.push(reference.clone());
        Ok(())
    }
}

/// Audit store that seals records in memory and can inject append failures.
#[derive(Default)]
pub struct FakeAuditLogStore {
    records: Mutex<Vec<(AuditRecord, AuditTier)>>,
    failures_remaining: Mutex<u32>,
    append_attempts: Mutex<u32>,
}

impl FakeAuditLogStore {
    pub async fn fail_next(&self, failures: u32) {
        *self.failures_remaining.lock().await = failures;
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(record, _)| record.clone())
            .collect()
    }

    pub async fn append_attempts(&self) -> u32 {
        *self.append_attempts.lock().await
    }

    pub async fn tier_of(&self, record_id: u64) -> Option<AuditTier> {
        self.records
            .lock()
            .await
            .iter()
            .find(|(record, _)| record.record_id() == record_id)
            .map(|(_, tier)| *tier)
    }

    /// Inserts a sealed record directly, bypassing the append path.
    pub async fn insert_sealed(&self, record: AuditRecord) {
        self.records.lock().await.push((record, AuditTier::Hot));
    }
}

#[async_trait]
impl AuditLogStore for FakeAuditLogStore {
    async fn append(&self, entry: AuditEntry) -> AppResult<AuditReceipt> {
        *self.append_attempts.lock().await += 1;
        {
            let mut failures = self.failures_remaining.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Unavailable("audit store offline".to_owned()));
            }
        }

        let mut records = self.records.lock().await;
        if let Some((existing, _)) = records
            .iter()
            .find(|(record, _)| record.entry().correlation_id() == entry.correlation_id())
        {
            return Ok(AuditReceipt::for_record(existing));
        }

        let previous = records
            .iter()
            .rev()
            .find(|(record, _)| record.entry().resource() == entry.resource())
            .map(|(record, _)| (record.sequence(), record.hash().to_owned()));
        let (sequence, previous_hash) = match previous {
            Some((sequence, hash)) => (sequence + 1, hash),
            None => (1, GENESIS_HASH.to_owned()),
        };
        let record_id = records
            .last()
            .map_or(1, |(record, _)| record.record_id() + 1);

        let record = AuditRecord::seal(record_id, sequence, Utc::now(), entry, previous_hash)?;
        let receipt = AuditReceipt::for_record(&record);
        records.push((record, AuditTier::Hot));
        Ok(receipt)
    }

    async fn query(
        &self,
        query: &AuditQuery,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<AuditPage> {
        let records: Vec<AuditRecord> = self
            .records
            .lock()
            .await
            .iter()
            .map(|(record, _)| record)
            .filter(|record| cursor.is_none_or(|cursor| record.record_id() > cursor))
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect();
        let next_cursor = if records.len() == limit {
            records.last().map(AuditRecord::record_id)
        } else {
            None
        };
        Ok(AuditPage {
            records,
            next_cursor,
        })
    }

    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> AppResult<Option<AuditRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|(record, _)| record.entry().correlation_id() == correlation_id)
            .map(|(record, _)| record.clone()))
    }

    async fn list_hot_after(
        &self,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<Vec<AuditRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|(record, tier)| {
                *tier == AuditTier::Hot && cursor.is_none_or(|cursor| record.record_id() > cursor)
            })
            .take(limit)
            .map(|(record, _)| record.clone())
            .collect())
    }
}

#[async_trait]
impl AuditTierStore for FakeAuditLogStore {
    async fn transition_to_cold(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut moved = 0;
        for (record, tier) in self.records.lock().await.iter_mut() {
            if *tier == AuditTier::Hot && record.recorded_at() < before {
                *tier = AuditTier::Cold;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn purge_expired(
        &self,
        before: DateTime<Utc>,
        retained: &[ResourceRef],
    ) -> AppResult<u64> {
        let mut records = self.records.lock().await;
        let count_before = records.len();
        records.retain(|(record, tier)| {
            *tier == AuditTier::Hot
                || record.recorded_at() >= before
                || retained.contains(record.entry().resource())
        });
        Ok((count_before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct FakeReconciliationQueue {
    pub items: Mutex<Vec<ReconciliationItem>>,
}

#[async_trait]
impl ReconciliationQueue for FakeReconciliationQueue {
    async fn enqueue(&self, item: ReconciliationItem) -> AppResult<()> {
        self.items.lock().await.push(item);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAlertNotifier {
    pub events: Mutex<Vec<AlertEvent>>,
}

#[async_trait]
impl AlertNotifier for FakeAlertNotifier {
    async fn notify(&self, event: AlertEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
