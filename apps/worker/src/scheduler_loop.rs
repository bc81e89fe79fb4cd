use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodian_application::{
    AuditMaintenanceReport, RetentionScheduler, ScanReport, SchedulerLease,
    SchedulerLeaseCoordinator,
};
use custodian_core::AppResult;
use tracing::{info, warn};

use crate::worker_config::SchedulerConfig;

pub const SCHEDULER_LEASE_SCOPE: &str = "retention-scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerTick {
    /// Another instance holds the lease.
    NotLeader,
    Completed {
        /// Marked interrupted when the lease was lost between batches.
        scan: ScanReport,
        /// Absent when the lease was lost during the scan.
        maintenance: Option<AuditMaintenanceReport>,
    },
}

/// Runs one scan and one audit tier maintenance pass while holding the
/// scheduler lease. Without a coordinator the instance runs unconditionally.
pub async fn run_scheduler_tick(
    scheduler: &RetentionScheduler,
    coordinator: Option<&dyn SchedulerLeaseCoordinator>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> AppResult<SchedulerTick> {
    let lease = match coordinator {
        Some(coordinator) => {
            match coordinator
                .try_acquire_lease(
                    SCHEDULER_LEASE_SCOPE,
                    config.holder_id.as_str(),
                    config.lease_seconds,
                )
                .await?
            {
                Some(lease) => Some((coordinator, lease)),
                None => return Ok(SchedulerTick::NotLeader),
            }
        }
        None => None,
    };

    let result = scan_and_maintain(scheduler, lease.as_ref(), config, now).await;

    if let Some((coordinator, lease)) = &lease
        && let Err(error) = coordinator.release_lease(lease).await
    {
        warn!(holder_id = %lease.holder_id, error = %error, "failed to release scheduler lease");
    }

    result
}

async fn scan_and_maintain(
    scheduler: &RetentionScheduler,
    lease: Option<&(&dyn SchedulerLeaseCoordinator, SchedulerLease)>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> AppResult<SchedulerTick> {
    let scan = match lease {
        Some((coordinator, lease)) => {
            let coordinator: &dyn SchedulerLeaseCoordinator = *coordinator;
            let lease_seconds = config.lease_seconds;
            scheduler
                .run_scan_with(now, move || coordinator.renew_lease(lease, lease_seconds))
                .await?
        }
        None => scheduler.run_scan(now).await?,
    };

    let lease_lost = match lease {
        Some(_) if scan.interrupted => true,
        Some((coordinator, lease)) => !coordinator.renew_lease(lease, config.lease_seconds).await?,
        None => false,
    };
    if lease_lost {
        warn!(
            holder_id = %config.holder_id,
            "scheduler lease lost during scan, skipping audit maintenance"
        );
        return Ok(SchedulerTick::Completed {
            scan,
            maintenance: None,
        });
    }

    let maintenance = scheduler.maintain_audit_tiers(now).await?;
    Ok(SchedulerTick::Completed {
        scan,
        maintenance: Some(maintenance),
    })
}

pub async fn run_scheduler_loop(
    scheduler: RetentionScheduler,
    coordinator: Option<Arc<dyn SchedulerLeaseCoordinator>>,
    config: SchedulerConfig,
) {
    loop {
        match run_scheduler_tick(&scheduler, coordinator.as_deref(), &config, Utc::now()).await {
            Ok(SchedulerTick::NotLeader) => {
                info!(holder_id = %config.holder_id, "scheduler lease held elsewhere");
            }
            Ok(SchedulerTick::Completed { scan, maintenance }) => {
                info!(
                    scanned = scan.scanned,
                    became_eligible = scan.became_eligible,
                    disposed = scan.disposed,
                    cascaded = scan.cascaded,
                    reparented = scan.reparented,
                    blocked = scan.blocked,
                    policy_missing = scan.policy_missing,
                    failed = scan.failed,
                    interrupted = scan.interrupted,
                    moved_to_cold = maintenance.map(|report| report.moved_to_cold),
                    purged = maintenance.map(|report| report.purged),
                    "retention scan completed"
                );
            }
            Err(error) => {
                warn!(holder_id = %config.holder_id, error = %error, "retention scan failed");
            }
        }

        tokio::time::sleep(config.interval).await;
    }
}
