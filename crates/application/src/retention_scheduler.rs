//! Retention and deletion scheduler.
//!
//! Moves resources through
//! `Active -> EligibleForDisposition -> DispositionInProgress -> Archived | Deleted`.
//! Every state change is a compare-and-set against the metadata read by the
//! scan, so a legal hold placed concurrently wins. Once a resource is claimed
//! as in progress no new hold can land; the deletion record is written before
//! the irreversible store action and the terminal state comes last, so a
//! re-run after a partial failure repeats only the idempotent steps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, ChannelTag, CorrelationId, PrincipalId};
use custodian_domain::{
    AccessAction, AuditEntry, AuditOutcome, DispositionAction, DispositionDetail,
    DispositionJustification, DispositionState, OperationalEvent, ResourceMetadata, ResourceRef,
    RetentionPolicy,
};
use serde::Serialize;

use crate::{
    AuditRecorder, AuditTierStore, PolicyCache, ResourceMetadataRepository, ResourceStore,
};

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSchedulerConfig {
    /// Resources loaded per batch.
    pub batch_size: usize,
    /// Service identity recorded on scheduler-written audit records.
    pub system_principal: PrincipalId,
    /// Channel tag recorded on scheduler-written audit records.
    pub channel: ChannelTag,
}

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Resources examined.
    pub scanned: u64,
    /// Resources whose retention elapsed during this scan.
    pub became_eligible: u64,
    /// Resources disposed for their own elapsed retention.
    pub disposed: u64,
    /// Dependents disposed alongside a parent.
    pub cascaded: u64,
    /// Held dependents detached from a disposed parent.
    pub reparented: u64,
    /// Eligible resources kept by a legal hold.
    pub blocked: u64,
    /// Resources skipped for lack of a retention policy.
    pub policy_missing: u64,
    /// Resources whose handling failed and will be retried next scan.
    pub failed: u64,
    /// Whether the scan stopped early because the caller asked it to.
    pub interrupted: bool,
}

/// Counters for one audit tier maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditMaintenanceReport {
    /// Records moved from the hot to the cold tier.
    pub moved_to_cold: u64,
    /// Expired records purged.
    pub purged: u64,
}

enum ResourceOutcome {
    Skipped,
    Blocked,
    Disposed { cascaded: u64, reparented: u64 },
    ResumedCascade { cascaded: u64, reparented: u64 },
}

/// Retention scheduler service.
#[derive(Clone)]
pub struct RetentionScheduler {
    metadata: Arc<dyn ResourceMetadataRepository>,
    store: Arc<dyn ResourceStore>,
    recorder: AuditRecorder,
    tiers: Arc<dyn AuditTierStore>,
    policy_cache: PolicyCache,
    config: RetentionSchedulerConfig,
}

impl RetentionScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        metadata: Arc<dyn ResourceMetadataRepository>,
        store: Arc<dyn ResourceStore>,
        recorder: AuditRecorder,
        tiers: Arc<dyn AuditTierStore>,
        policy_cache: PolicyCache,
        config: RetentionSchedulerConfig,
    ) -> Self {
        Self {
            metadata,
            store,
            recorder,
            tiers,
            policy_cache,
            config,
        }
    }

    /// Scans every resource once, yielding between batches.
    pub async fn run_scan(&self, now: DateTime<Utc>) -> AppResult<ScanReport> {
        self.run_scan_with(now, || async { Ok(true) }).await
    }

    /// Scans every resource once, calling `between_batches` after each full
    /// batch. The scan stops early, marked as interrupted, when the callback
    /// returns `false`.
    pub async fn run_scan_with<F, Fut>(
        &self,
        now: DateTime<Utc>,
        mut between_batches: F,
    ) -> AppResult<ScanReport>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<bool>>,
    {
        let mut report = ScanReport::default();
        let mut after: Option<ResourceRef> = None;
        let batch_size = self.config.batch_size.max(1);

        loop {
            let batch = self
                .metadata
                .list_metadata_batch(after.as_ref(), batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.reference().clone());

            for listed in &batch {
                report.scanned += 1;
                match self.process_resource(listed.reference(), now, &mut report).await {
                    Ok(ResourceOutcome::Skipped) => {}
                    Ok(ResourceOutcome::Blocked) => report.blocked += 1,
                    Ok(ResourceOutcome::Disposed {
                        cascaded,
                        reparented,
                    }) => {
                        report.disposed += 1;
                        report.cascaded += cascaded;
                        report.reparented += reparented;
                    }
                    Ok(ResourceOutcome::ResumedCascade {
                        cascaded,
                        reparented,
                    }) => {
                        report.cascaded += cascaded;
                        report.reparented += reparented;
                    }
                    Err(AppError::RetentionBlocked(message)) => {
                        report.blocked += 1;
                        tracing::info!(
                            resource = %listed.reference(),
                            code = "RETENTION_BLOCKED",
                            reason = %message,
                            "disposition blocked by concurrent change"
                        );
                    }
                    Err(AppError::PolicyNotFound(message)) => {
                        report.policy_missing += 1;
                        tracing::error!(
                            resource = %listed.reference(),
                            error = %message,
                            "resource skipped: no retention policy"
                        );
                    }
                    Err(error) => {
                        report.failed += 1;
                        tracing::error!(
                            resource = %listed.reference(),
                            error = %error,
                            "resource disposition failed"
                        );
                    }
                }
            }

            if batch.len() < batch_size {
                break;
            }
            if !between_batches().await? {
                report.interrupted = true;
                tracing::warn!(scanned = report.scanned, "retention scan interrupted");
                break;
            }
            tokio::task::yield_now().await;
        }

        tracing::info!(
            scanned = report.scanned,
            became_eligible = report.became_eligible,
            disposed = report.disposed,
            cascaded = report.cascaded,
            reparented = report.reparented,
            blocked = report.blocked,
            policy_missing = report.policy_missing,
            failed = report.failed,
            interrupted = report.interrupted,
            "retention scan finished"
        );
        Ok(report)
    }

    async fn process_resource(
        &self,
        reference: &ResourceRef,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> AppResult<ResourceOutcome> {
        let Some(metadata) = self.metadata.find_metadata(reference).await? else {
            return Ok(ResourceOutcome::Skipped);
        };
        if metadata.is_disposed() {
            return Ok(ResourceOutcome::Skipped);
        }

        let snapshot = self.policy_cache.snapshot().await?;

        if let Some(parent) = metadata.parent()
            && let Some(parent_metadata) = self.metadata.find_metadata(parent).await?
            && parent_metadata.is_disposed()
            && let Some(parent_policy) = snapshot
                .retention_policy_in_effect(parent_metadata.retention_class(), now)
                .cloned()
        {
            tracing::warn!(
                resource = %reference,
                parent = %parent,
                "resuming interrupted cascade"
            );
            let (cascaded, reparented) = self.cascade(parent, &parent_policy).await?;
            return Ok(ResourceOutcome::ResumedCascade {
                cascaded,
                reparented,
            });
        }

        let Some(policy) = snapshot
            .retention_policy_in_effect(metadata.retention_class(), now)
            .cloned()
        else {
            self.recorder
                .escalate(OperationalEvent::PolicyNotFound {
                    resource: reference.clone(),
                    retention_class: metadata.retention_class().clone(),
                })
                .await;
            return Err(AppError::PolicyNotFound(format!(
                "retention class '{}' has no policy in effect",
                metadata.retention_class().as_str()
            )));
        };

        let metadata = if metadata.state() == DispositionState::Active {
            if !policy.has_elapsed(metadata.created_at(), now) {
                return Ok(ResourceOutcome::Skipped);
            }
            let mut eligible = metadata.clone();
            eligible.transition_to(DispositionState::EligibleForDisposition)?;
            self.replace(&metadata, eligible.clone()).await?;
            report.became_eligible += 1;
            eligible
        } else {
            metadata
        };

        if let Some(hold) = metadata.legal_hold() {
            tracing::info!(
                resource = %reference,
                code = "RETENTION_BLOCKED",
                "disposition blocked by legal hold"
            );
            if let Some(review_at) = hold.review_at()
                && hold.is_past_review(now)
            {
                self.recorder
                    .escalate(OperationalEvent::LegalHoldPastReview {
                        resource: reference.clone(),
                        review_at,
                    })
                    .await;
            }
            return Ok(ResourceOutcome::Blocked);
        }

        self.dispose(metadata, &policy, DispositionJustification::RetentionElapsed)
            .await?;
        let (cascaded, reparented) = self.cascade(reference, &policy).await?;
        Ok(ResourceOutcome::Disposed {
            cascaded,
            reparented,
        })
    }

    /// Claims the resource, writes the deletion record, performs the store
    /// action, then records the terminal state.
    async fn dispose(
        &self,
        metadata: ResourceMetadata,
        policy: &RetentionPolicy,
        justification: DispositionJustification,
    ) -> AppResult<()> {
        let reference = metadata.reference().clone();
        let (action, terminal) = match policy.disposition() {
            DispositionAction::Delete => (AccessAction::RecordDisposed, DispositionState::Deleted),
            DispositionAction::Archive => {
                (AccessAction::RecordArchived, DispositionState::Archived)
            }
        };

        let claimed = self.claim(metadata).await?;

        let entry = self
            .system_entry(
                action,
                reference.clone(),
                CorrelationId::derived(format!("dispose:{reference}").as_str()),
            )
            .with_disposition(DispositionDetail {
                retention_class: policy.class().clone(),
                policy_version: policy.version(),
                disposition: policy.disposition(),
                justification,
            });
        self.recorder.record(entry).await?;

        match policy.disposition() {
            DispositionAction::Delete => self.store.delete(&reference).await?,
            DispositionAction::Archive => self.store.archive(&reference).await?,
        }

        let mut disposed = claimed.clone();
        disposed.transition_to(terminal)?;
        self.replace(&claimed, disposed).await?;

        tracing::info!(
            resource = %reference,
            disposition = policy.disposition().as_str(),
            policy_version = policy.version(),
            "resource disposed"
        );
        Ok(())
    }

    /// Moves the resource to `DispositionInProgress` unless a previous run
    /// already did.
    async fn claim(&self, metadata: ResourceMetadata) -> AppResult<ResourceMetadata> {
        if metadata.state() == DispositionState::DispositionInProgress {
            return Ok(metadata);
        }

        let mut claimed = metadata.clone();
        if claimed.state() == DispositionState::Active {
            claimed.transition_to(DispositionState::EligibleForDisposition)?;
        }
        claimed.transition_to(DispositionState::DispositionInProgress)?;
        self.replace(&metadata, claimed.clone()).await?;
        Ok(claimed)
    }

    /// Compare-and-set against `expected`. A lost race surfaces as
    /// `RetentionBlocked` when a legal hold won it, `Conflict` otherwise.
    async fn replace(&self, expected: &ResourceMetadata, next: ResourceMetadata) -> AppResult<()> {
        if self.metadata.replace_metadata(expected, next).await? {
            return Ok(());
        }

        let reference = expected.reference();
        let held = self
            .metadata
            .find_metadata(reference)
            .await?
            .is_some_and(|current| current.is_held());
        if held {
            return Err(AppError::RetentionBlocked(format!(
                "resource '{reference}' was placed under legal hold"
            )));
        }

        Err(AppError::Conflict(format!(
            "resource '{reference}' changed during disposition"
        )))
    }

    /// Disposes every live dependent of `parent`, detaching held ones instead.
    async fn cascade(&self, parent: &ResourceRef, policy: &RetentionPolicy) -> AppResult<(u64, u64)> {
        let mut cascaded = 0;
        let mut reparented = 0;
        let mut pending = vec![parent.clone()];

        while let Some(current) = pending.pop() {
            for listed in self.metadata.list_dependents(&current).await? {
                if listed.is_disposed() {
                    continue;
                }
                let reference = listed.reference().clone();

                let held = if listed.is_held() {
                    listed
                } else {
                    match self
                        .dispose(
                            listed,
                            policy,
                            DispositionJustification::CascadeFromParent {
                                parent: current.clone(),
                            },
                        )
                        .await
                    {
                        Ok(()) => {
                            cascaded += 1;
                            pending.push(reference);
                            continue;
                        }
                        Err(AppError::RetentionBlocked(_)) => {
                            match self.metadata.find_metadata(&reference).await? {
                                Some(fresh) if fresh.is_held() => fresh,
                                _ => continue,
                            }
                        }
                        Err(error) => return Err(error),
                    }
                };

                let entry = self.system_entry(
                    AccessAction::RecordReparented,
                    reference.clone(),
                    CorrelationId::derived(format!("reparent:{reference}:{current}").as_str()),
                );
                self.recorder.record(entry).await?;
                let mut detached = held.clone();
                detached.detach_from_parent();
                self.replace(&held, detached).await?;
                reparented += 1;
                tracing::info!(
                    resource = %reference,
                    parent = %current,
                    "held dependent detached from disposed parent"
                );
            }
        }

        Ok((cascaded, reparented))
    }

    fn system_entry(
        &self,
        action: AccessAction,
        resource: ResourceRef,
        correlation_id: CorrelationId,
    ) -> AuditEntry {
        AuditEntry::new(
            self.config.system_principal,
            Vec::new(),
            action,
            resource,
            AuditOutcome::Success,
            self.config.channel.clone(),
            correlation_id,
        )
    }

    /// Moves aged records to the cold tier and purges expired ones.
    ///
    /// Records of resources under legal hold are never purged. Purging is
    /// skipped entirely when audit retention no longer covers the longest
    /// resource retention.
    pub async fn maintain_audit_tiers(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<AuditMaintenanceReport> {
        let snapshot = self.policy_cache.snapshot().await?;
        let retention = snapshot.audit_retention();

        let moved_to_cold = self
            .tiers
            .transition_to_cold(retention.hot_tier_cutoff(now))
            .await?;

        let purged = match (
            retention.validate_against(snapshot.retention_policies()),
            retention.expiry_cutoff(now),
        ) {
            (Err(error), _) => {
                tracing::error!(error = %error, "audit purge skipped: retention misconfigured");
                0
            }
            (Ok(()), None) => 0,
            (Ok(()), Some(cutoff)) => {
                let held = self.metadata.list_held_references().await?;
                self.tiers.purge_expired(cutoff, &held).await?
            }
        };

        tracing::info!(moved_to_cold, purged, "audit tier maintenance finished");
        Ok(AuditMaintenanceReport {
            moved_to_cold,
            purged,
        })
    }
}
