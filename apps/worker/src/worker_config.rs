use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use custodian_application::AuditRetryPolicy;
use custodian_core::{AppError, AppResult, ChannelTag, PrincipalId};

#[derive(Debug, Clone)]
pub struct AlertWebhookConfig {
    pub url: String,
    pub max_attempts: u8,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub lease_seconds: u32,
    pub holder_id: String,
    pub system_principal: PrincipalId,
    pub channel: ChannelTag,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub poll_interval: Duration,
    pub batch_limit: usize,
    pub rules_path: Option<PathBuf>,
    pub start_cursor: Option<u64>,
    pub webhook: Option<AlertWebhookConfig>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub resource_store_url: String,
    pub policy_cache_staleness: Duration,
    pub audit_retry: AuditRetryPolicy,
    pub scheduler: SchedulerConfig,
    pub alerts: AlertConfig,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let redis_url = optional_non_empty_env("REDIS_URL");
        let resource_store_url = required_env("RESOURCE_STORE_URL")?;

        let policy_cache_staleness =
            Duration::from_secs(parse_env("POLICY_CACHE_STALENESS_SECONDS", 5_u64)?);
        let audit_retry = AuditRetryPolicy::new(
            parse_env("AUDIT_WRITE_MAX_ATTEMPTS", 3_u32)?,
            Duration::from_millis(parse_env("AUDIT_WRITE_BACKOFF_MS", 100_u64)?),
        )?;

        let scheduler = SchedulerConfig {
            interval: Duration::from_secs(parse_positive_env(
                "SCHEDULER_INTERVAL_SECONDS",
                300_u64,
            )?),
            batch_size: parse_positive_env("SCHEDULER_BATCH_SIZE", 500_usize)?,
            lease_seconds: parse_positive_env("SCHEDULER_LEASE_SECONDS", 600_u32)?,
            holder_id: optional_non_empty_env("SCHEDULER_HOLDER_ID")
                .map(|value| value.trim().to_owned())
                .unwrap_or_else(|| format!("custodian-worker-{}", std::process::id())),
            system_principal: PrincipalId::parse(&required_env("SCHEDULER_SYSTEM_PRINCIPAL_ID")?)?,
            channel: ChannelTag::new(
                optional_non_empty_env("SCHEDULER_CHANNEL")
                    .unwrap_or_else(|| "retention-scheduler".to_owned()),
            )?,
        };

        let alerts = AlertConfig {
            poll_interval: Duration::from_millis(parse_positive_env(
                "ALERT_POLL_INTERVAL_MS",
                2_000_u64,
            )?),
            batch_limit: parse_positive_env("ALERT_BATCH_LIMIT", 500_usize)?,
            rules_path: optional_non_empty_env("ALERT_RULES_PATH").map(PathBuf::from),
            start_cursor: optional_non_empty_env("ALERT_START_CURSOR")
                .map(|_| parse_env("ALERT_START_CURSOR", 0_u64))
                .transpose()?,
            webhook: optional_non_empty_env("ALERT_WEBHOOK_URL")
                .map(|url| -> AppResult<AlertWebhookConfig> {
                    Ok(AlertWebhookConfig {
                        url,
                        max_attempts: parse_positive_env("ALERT_WEBHOOK_MAX_ATTEMPTS", 3_u8)?,
                        retry_backoff_ms: parse_env("ALERT_WEBHOOK_BACKOFF_MS", 250_u64)?,
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            database_url,
            redis_url,
            resource_store_url,
            policy_cache_staleness,
            audit_retry,
            scheduler,
            alerts,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    optional_non_empty_env(name)
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn optional_non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_non_empty_env(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn parse_positive_env<T>(name: &str, default: T) -> AppResult<T>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_env(name, default)?;
    if value == T::default() {
        return Err(AppError::Validation(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}
