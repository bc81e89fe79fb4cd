use std::collections::VecDeque;
use std::sync::Arc;

use custodian_core::{AppError, AppResult, RequestContext};
use custodian_domain::{AccessAction, AuditRecord, GENESIS_HASH, ResourceRef};
use futures::{Stream, TryStreamExt};
use serde::Serialize;

use crate::{AccessMediator, AccessRequest, AuditLogStore, AuditPage, AuditQuery, FnOperation};

/// Largest page a caller may request.
pub const AUDIT_PAGE_LIMIT_MAX: usize = 500;

/// Lazily streams every record selected by `query`, starting after `cursor`.
///
/// Pages are fetched on demand. The stream ends once the store reports no
/// further cursor; restarting from the last yielded record id resumes it.
pub fn audit_record_stream(
    store: Arc<dyn AuditLogStore>,
    query: AuditQuery,
    cursor: Option<u64>,
    page_size: usize,
) -> impl Stream<Item = AppResult<AuditRecord>> + Send {
    struct State {
        buffer: VecDeque<AuditRecord>,
        cursor: Option<u64>,
        exhausted: bool,
    }

    let initial = State {
        buffer: VecDeque::new(),
        cursor,
        exhausted: false,
    };

    futures::stream::try_unfold(initial, move |mut state| {
        let store = store.clone();
        let query = query.clone();
        async move {
            loop {
                if let Some(record) = state.buffer.pop_front() {
                    return Ok(Some((record, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }

                let page = store.query(&query, state.cursor, page_size.max(1)).await?;
                state.exhausted = page.next_cursor.is_none();
                state.cursor = page.next_cursor;
                state.buffer.extend(page.records);
            }
        }
    })
}

/// Why a resource stream failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// The stored hash does not match the record contents.
    HashMismatch,
    /// The sequence skips or repeats a position.
    SequenceGap,
    /// The record does not link to its predecessor's hash.
    BrokenLink,
}

/// First inconsistency found in a resource stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    /// Offending record.
    pub record_id: u64,
    /// Its stream position.
    pub sequence: u64,
    /// Kind of inconsistency.
    pub kind: ChainBreakKind,
}

/// Result of verifying one resource stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    /// Verified resource.
    pub resource: ResourceRef,
    /// Records examined.
    pub records_checked: u64,
    /// First break, absent when the stream is intact.
    pub first_break: Option<ChainBreak>,
}

/// Verifies hash links and sequence continuity of one resource stream.
///
/// A stream whose earliest records were purged by audit retention is anchored
/// at its first remaining record.
pub async fn verify_chain<S>(resource: ResourceRef, records: S) -> AppResult<ChainVerification>
where
    S: Stream<Item = AppResult<AuditRecord>>,
{
    let mut records = std::pin::pin!(records);
    let mut previous: Option<AuditRecord> = None;
    let mut records_checked = 0_u64;

    while let Some(record) = records.try_next().await? {
        records_checked += 1;
        let kind = if !record.verify_hash() {
            Some(ChainBreakKind::HashMismatch)
        } else {
            match &previous {
                None if record.sequence() == 1 && record.previous_hash() != GENESIS_HASH => {
                    Some(ChainBreakKind::BrokenLink)
                }
                None => None,
                Some(previous) if record.sequence() != previous.sequence() + 1 => {
                    Some(ChainBreakKind::SequenceGap)
                }
                Some(previous) if !record.follows(previous) => Some(ChainBreakKind::BrokenLink),
                Some(_) => None,
            }
        };

        if let Some(kind) = kind {
            return Ok(ChainVerification {
                resource,
                records_checked,
                first_break: Some(ChainBreak {
                    record_id: record.record_id(),
                    sequence: record.sequence(),
                    kind,
                }),
            });
        }
        previous = Some(record);
    }

    Ok(ChainVerification {
        resource,
        records_checked,
        first_break: None,
    })
}

/// Read-only audit query API. Every query is itself authorized and audited.
#[derive(Clone)]
pub struct AuditQueryService {
    mediator: AccessMediator,
    store: Arc<dyn AuditLogStore>,
}

impl AuditQueryService {
    /// Creates the query service.
    #[must_use]
    pub fn new(mediator: AccessMediator, store: Arc<dyn AuditLogStore>) -> Self {
        Self { mediator, store }
    }

    /// Returns one page of history for `query`.
    pub async fn history(
        &self,
        context: &RequestContext,
        query: AuditQuery,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<AuditPage> {
        if limit == 0 || limit > AUDIT_PAGE_LIMIT_MAX {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {AUDIT_PAGE_LIMIT_MAX}"
            )));
        }

        let target = audit_target(&query)?;
        let store = self.store.clone();
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::AuditTrailView, target),
                FnOperation::new(move |_grant| async move {
                    store.query(&query, cursor, limit).await
                }),
            )
            .await
    }

    /// Verifies the hash chain of one resource stream.
    pub async fn verify_resource_chain(
        &self,
        context: &RequestContext,
        resource: ResourceRef,
    ) -> AppResult<ChainVerification> {
        let store = self.store.clone();
        let target = resource.clone();
        self.mediator
            .mediate(
                context,
                AccessRequest::new(AccessAction::AuditTrailView, target),
                FnOperation::new(move |_grant| async move {
                    let records = audit_record_stream(
                        store,
                        AuditQuery::ByResource(resource.clone()),
                        None,
                        AUDIT_PAGE_LIMIT_MAX,
                    );
                    verify_chain(resource, records).await
                }),
            )
            .await
    }
}

fn audit_target(query: &AuditQuery) -> AppResult<ResourceRef> {
    match query {
        AuditQuery::ByResource(resource) => Ok(resource.clone()),
        AuditQuery::ByPrincipal(principal_id) => {
            ResourceRef::configuration("principal", principal_id.to_string().as_str())
        }
        AuditQuery::ByTimeRange { .. } => ResourceRef::configuration("audit_trail", "time-range"),
    }
}

#[cfg(test)]
mod tests;
