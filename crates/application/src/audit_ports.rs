use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, CorrelationId, PrincipalId};
use custodian_domain::{AuditEntry, AuditRecord, ResourceRef};
use serde::{Deserialize, Serialize};

/// Durable position returned for one appended audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReceipt {
    /// Global record identifier.
    pub record_id: u64,
    /// Position within the resource stream.
    pub sequence: u64,
    /// Hash of the sealed record.
    pub hash: String,
}

impl AuditReceipt {
    /// Builds the receipt describing a sealed record.
    #[must_use]
    pub fn for_record(record: &AuditRecord) -> Self {
        Self {
            record_id: record.record_id(),
            sequence: record.sequence(),
            hash: record.hash().to_owned(),
        }
    }
}

/// Audit history selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditQuery {
    /// Full stream of one resource.
    ByResource(ResourceRef),
    /// Every record written for one principal.
    ByPrincipal(PrincipalId),
    /// Records written within `[from, to)`.
    ByTimeRange {
        /// Inclusive lower bound.
        from: DateTime<Utc>,
        /// Exclusive upper bound.
        to: DateTime<Utc>,
    },
}

impl AuditQuery {
    /// Builds a validated time-range query.
    pub fn time_range(from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<Self> {
        if from >= to {
            return Err(AppError::Validation(
                "time range start must precede its end".to_owned(),
            ));
        }

        Ok(Self::ByTimeRange { from, to })
    }

    /// Returns whether a record is selected by this query.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        match self {
            Self::ByResource(resource) => record.entry().resource() == resource,
            Self::ByPrincipal(principal_id) => record.entry().principal_id() == *principal_id,
            Self::ByTimeRange { from, to } => {
                record.recorded_at() >= *from && record.recorded_at() < *to
            }
        }
    }
}

/// One page of audit history ordered by record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPage {
    /// Records in ascending record id order.
    pub records: Vec<AuditRecord>,
    /// Cursor for the next page, absent once the history is exhausted.
    pub next_cursor: Option<u64>,
}

/// Append-only audit log store port.
///
/// Implementations must serialize appends per resource stream, assign globally
/// unique monotonic record ids and never expose update or delete on this path.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    /// Appends one entry. Appending an entry whose correlation id already has
    /// a record returns the original receipt and writes nothing.
    async fn append(&self, entry: AuditEntry) -> AppResult<AuditReceipt>;

    /// Reads one page of records with `record_id > cursor` across both tiers.
    async fn query(
        &self,
        query: &AuditQuery,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<AuditPage>;

    /// Finds the record written for one correlation id.
    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> AppResult<Option<AuditRecord>>;

    /// Reads hot-tier records with `record_id > cursor` for stream consumers.
    async fn list_hot_after(&self, cursor: Option<u64>, limit: usize)
    -> AppResult<Vec<AuditRecord>>;
}

/// Tier maintenance port used only by the retention scheduler.
#[async_trait]
pub trait AuditTierStore: Send + Sync {
    /// Moves hot records written before `before` to the cold tier.
    async fn transition_to_cold(&self, before: DateTime<Utc>) -> AppResult<u64>;

    /// Purges cold records written before `before`, keeping every stream in `retained`.
    async fn purge_expired(
        &self,
        before: DateTime<Utc>,
        retained: &[ResourceRef],
    ) -> AppResult<u64>;
}
