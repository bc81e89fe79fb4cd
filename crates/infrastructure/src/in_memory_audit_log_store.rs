use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_application::{
    AuditLogStore, AuditPage, AuditQuery, AuditReceipt, AuditTierStore,
};
use custodian_core::{AppError, AppResult, CorrelationId};
use custodian_domain::{AuditEntry, AuditRecord, AuditTier, GENESIS_HASH, ResourceRef};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
struct StreamHead {
    last_sequence: u64,
    last_hash: String,
}

impl Default for StreamHead {
    fn default() -> Self {
        Self {
            last_sequence: 0,
            last_hash: GENESIS_HASH.to_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct RecordTable {
    next_record_id: u64,
    records: BTreeMap<u64, (AuditRecord, AuditTier)>,
    by_correlation: HashMap<CorrelationId, u64>,
    last_recorded_at: Option<DateTime<Utc>>,
}

/// In-memory append-only audit log.
///
/// Sequence assignment is serialized per resource stream. Record ids are
/// allocated and published under one short table lock, so a poller reading
/// after a cursor never skips a record that commits later with a lower id.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogStore {
    streams: Mutex<HashMap<ResourceRef, Arc<Mutex<StreamHead>>>>,
    table: RwLock<RecordTable>,
}

impl InMemoryAuditLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn stream_for(&self, resource: &ResourceRef) -> Arc<Mutex<StreamHead>> {
        self.streams
            .lock()
            .await
            .entry(resource.clone())
            .or_default()
            .clone()
    }

    /// Returns every record of one stream in sequence order, across tiers.
    pub async fn stream_records(&self, resource: &ResourceRef) -> Vec<AuditRecord> {
        self.table
            .read()
            .await
            .records
            .values()
            .filter(|(record, _)| record.entry().resource() == resource)
            .map(|(record, _)| record.clone())
            .collect()
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn append(&self, entry: AuditEntry) -> AppResult<AuditReceipt> {
        let stream = self.stream_for(entry.resource()).await;
        let mut head = stream.lock().await;
        let mut table = self.table.write().await;

        if let Some((existing, _)) = table
            .by_correlation
            .get(&entry.correlation_id())
            .and_then(|record_id| table.records.get(record_id))
        {
            if !existing.entry().is_replayed_by(&entry) {
                return Err(AppError::Conflict(format!(
                    "correlation id '{}' already identifies a different audited call",
                    entry.correlation_id()
                )));
            }
            return Ok(AuditReceipt::for_record(existing));
        }

        let record_id = table.next_record_id + 1;
        let correlation_id = entry.correlation_id();
        // Non-decreasing even if the wall clock steps back.
        let recorded_at = table
            .last_recorded_at
            .map_or_else(Utc::now, |last| last.max(Utc::now()));
        let record = AuditRecord::seal(
            record_id,
            head.last_sequence + 1,
            recorded_at,
            entry,
            head.last_hash.clone(),
        )?;

        table.next_record_id = record_id;
        table.last_recorded_at = Some(recorded_at);
        table.by_correlation.insert(correlation_id, record_id);
        table
            .records
            .insert(record_id, (record.clone(), AuditTier::Hot));
        drop(table);

        head.last_sequence = record.sequence();
        head.last_hash = record.hash().to_owned();
        Ok(AuditReceipt::for_record(&record))
    }

    async fn query(
        &self,
        query: &AuditQuery,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<AuditPage> {
        let table = self.table.read().await;
        let start = cursor.map_or(0, |cursor| cursor.saturating_add(1));
        let records: Vec<AuditRecord> = table
            .records
            .range(start..)
            .map(|(_, (record, _))| record)
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = (records.len() == limit)
            .then(|| records.last().map(AuditRecord::record_id))
            .flatten();
        Ok(AuditPage {
            records,
            next_cursor,
        })
    }

    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> AppResult<Option<AuditRecord>> {
        let table = self.table.read().await;
        Ok(table
            .by_correlation
            .get(&correlation_id)
            .and_then(|record_id| table.records.get(record_id))
            .map(|(record, _)| record.clone()))
    }

    async fn list_hot_after(
        &self,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<Vec<AuditRecord>> {
        let start = cursor.map_or(0, |cursor| cursor.saturating_add(1));
        Ok(self
            .table
            .read()
            .await
            .records
            .range(start..)
            .filter(|(_, (_, tier))| *tier == AuditTier::Hot)
            .take(limit)
            .map(|(_, (record, _))| record.clone())
            .collect())
    }
}

#[async_trait]
impl AuditTierStore for InMemoryAuditLogStore {
    async fn transition_to_cold(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut table = self.table.write().await;
        let mut moved = 0;
        for (record, tier) in table.records.values_mut() {
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
        let mut table = self.table.write().await;
        let expired: Vec<(u64, CorrelationId)> = table
            .records
            .iter()
            .filter(|(_, (record, tier))| {
                *tier == AuditTier::Cold
                    && record.recorded_at() < before
                    && !retained.contains(record.entry().resource())
            })
            .map(|(record_id, (record, _))| (*record_id, record.entry().correlation_id()))
            .collect();

        for (record_id, correlation_id) in &expired {
            table.records.remove(record_id);
            table.by_correlation.remove(correlation_id);
        }
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests;
