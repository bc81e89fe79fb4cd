use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use custodian_application::AuditRetryPolicy;
use custodian_core::AppError;
use tracing_subscriber::EnvFilter;

const GATEWAY_SECRET_MIN_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct AlertWebhookConfig {
    pub url: String,
    pub max_attempts: u8,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub gateway_secret: String,
    pub policy_cache_staleness: Duration,
    pub audit_retry: AuditRetryPolicy,
    pub decision_retry: AuditRetryPolicy,
    pub mediation_timeout: Duration,
    pub alert_webhook: Option<AlertWebhookConfig>,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_env("DATABASE_URL")?;
        let redis_url = optional_non_empty_env("REDIS_URL");
        let gateway_secret = required_env("API_GATEWAY_SECRET")?;
        if gateway_secret.len() < GATEWAY_SECRET_MIN_LENGTH {
            return Err(AppError::Validation(format!(
                "API_GATEWAY_SECRET must be at least {GATEWAY_SECRET_MIN_LENGTH} characters"
            )));
        }

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = parse_env("API_PORT", 3001_u16)?;

        let policy_cache_staleness =
            Duration::from_secs(parse_env("POLICY_CACHE_STALENESS_SECONDS", 5_u64)?);
        let audit_retry = AuditRetryPolicy::new(
            parse_env("AUDIT_WRITE_MAX_ATTEMPTS", 3_u32)?,
            Duration::from_millis(parse_env("AUDIT_WRITE_BACKOFF_MS", 100_u64)?),
        )?;
        let decision_retry = AuditRetryPolicy::new(
            parse_env("DECISION_MAX_ATTEMPTS", 3_u32)?,
            Duration::from_millis(parse_env("DECISION_BACKOFF_MS", 100_u64)?),
        )?;
        let mediation_timeout = Duration::from_millis(parse_positive_env(
            "MEDIATION_TIMEOUT_MS",
            5_000_u64,
        )?);

        let alert_webhook = optional_non_empty_env("ALERT_WEBHOOK_URL")
            .map(|url| -> Result<AlertWebhookConfig, AppError> {
                Ok(AlertWebhookConfig {
                    url,
                    max_attempts: parse_positive_env("ALERT_WEBHOOK_MAX_ATTEMPTS", 3_u8)?,
                    retry_backoff_ms: parse_env("ALERT_WEBHOOK_BACKOFF_MS", 250_u64)?,
                })
            })
            .transpose()?;

        Ok(Self {
            migrate_only,
            database_url,
            redis_url,
            api_host,
            api_port,
            gateway_secret,
            policy_cache_staleness,
            audit_retry,
            decision_retry,
            mediation_timeout,
            alert_webhook,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> Result<String, AppError> {
    let value =
        env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn optional_non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_non_empty_env(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}

fn parse_positive_env<T>(name: &str, default: T) -> Result<T, AppError>
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
