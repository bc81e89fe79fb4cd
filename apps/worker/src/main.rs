//! Custodian background runtime: retention scheduler and access alert monitor.

#![forbid(unsafe_code)]

mod alert_rules;
mod scheduler_loop;
mod worker_config;

use std::sync::Arc;
use std::time::Duration;

use custodian_application::{
    AlertMonitor, AlertNotifier, AuditRecorder, PolicyCache, RetentionScheduler,
    RetentionSchedulerConfig, SchedulerLeaseCoordinator,
};
use custodian_core::{AppError, AppResult};
use custodian_infrastructure::{
    HttpAlertNotifier, HttpResourceStore, PostgresAuditLogStore, PostgresPolicyRepository,
    PostgresResourceMetadataRepository, RedisSchedulerLeaseCoordinator, TracingAlertNotifier,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::alert_rules::load_alert_rules;
use crate::scheduler_loop::run_scheduler_loop;
use crate::worker_config::{AlertConfig, WorkerConfig};

const LEASE_KEY_PREFIX: &str = "custodian";

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    let audit_store = Arc::new(PostgresAuditLogStore::new(pool.clone()));
    let metadata = Arc::new(PostgresResourceMetadataRepository::new(pool.clone()));
    let policies = Arc::new(PostgresPolicyRepository::new(pool));
    let notifier: Arc<dyn AlertNotifier> = match &config.alerts.webhook {
        Some(webhook) => Arc::new(HttpAlertNotifier::new(
            http_client.clone(),
            webhook.url.as_str(),
            webhook.max_attempts,
            webhook.retry_backoff_ms,
        )),
        None => Arc::new(TracingAlertNotifier),
    };

    let scheduler = RetentionScheduler::new(
        metadata,
        Arc::new(HttpResourceStore::new(
            http_client,
            config.resource_store_url.as_str(),
        )),
        AuditRecorder::new(audit_store.clone(), notifier.clone(), config.audit_retry),
        audit_store.clone(),
        PolicyCache::new(policies, config.policy_cache_staleness),
        RetentionSchedulerConfig {
            batch_size: config.scheduler.batch_size,
            system_principal: config.scheduler.system_principal,
            channel: config.scheduler.channel.clone(),
        },
    );

    let coordinator = match config.redis_url.as_deref() {
        Some(redis_url) => {
            let client = redis::Client::open(redis_url)
                .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;
            Some(Arc::new(RedisSchedulerLeaseCoordinator::new(client, LEASE_KEY_PREFIX))
                as Arc<dyn SchedulerLeaseCoordinator>)
        }
        None => {
            warn!("REDIS_URL is not set; scheduler lease disabled, run a single worker");
            None
        }
    };

    let rules = load_alert_rules(
        config.alerts.rules_path.as_deref(),
        config.scheduler.system_principal,
    )?;
    let monitor = AlertMonitor::new(audit_store, notifier, rules, config.alerts.start_cursor);

    info!(
        holder_id = %config.scheduler.holder_id,
        scheduler_interval = ?config.scheduler.interval,
        lease_seconds = config.scheduler.lease_seconds,
        alert_poll_interval = ?config.alerts.poll_interval,
        "custodian-worker started"
    );

    tokio::select! {
        () = run_scheduler_loop(scheduler, coordinator, config.scheduler.clone()) => {}
        () = run_alert_loop(monitor, config.alerts.clone()) => {}
    }

    Ok(())
}

async fn run_alert_loop(mut monitor: AlertMonitor, config: AlertConfig) {
    loop {
        let backlog = match monitor.poll(config.batch_limit).await {
            Ok(report) => {
                if report.alerts > 0 {
                    info!(alerts = report.alerts, cursor = report.cursor, "alert poll raised alerts");
                }
                report.records == config.batch_limit
            }
            Err(error) => {
                warn!(cursor = monitor.cursor(), error = %error, "alert poll failed");
                false
            }
        };

        if !backlog {
            tokio::time::sleep(config.poll_interval).await;
        }
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
