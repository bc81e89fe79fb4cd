//! Redis-backed lease ensuring a single active retention scheduler.

use async_trait::async_trait;
use custodian_application::{SchedulerLease, SchedulerLeaseCoordinator};
use custodian_core::{AppError, AppResult};
use redis::Script;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Redis implementation of scheduler lease coordination.
#[derive(Clone)]
pub struct RedisSchedulerLeaseCoordinator {
    client: redis::Client,
    key_prefix: String,
}

impl RedisSchedulerLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, scope_key: &str) -> String {
        format!("{}:{scope_key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to connect to redis: {error}")))
    }
}

fn validate_lease_seconds(lease_seconds: u32) -> AppResult<()> {
    if lease_seconds == 0 {
        return Err(AppError::Validation(
            "scheduler lease_seconds must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}

#[async_trait]
impl SchedulerLeaseCoordinator for RedisSchedulerLeaseCoordinator {
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<SchedulerLease>> {
        if scope_key.trim().is_empty() || holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "scheduler lease scope_key and holder_id must not be empty".to_owned(),
            ));
        }
        validate_lease_seconds(lease_seconds)?;

        let key = self.key_for(scope_key);
        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let mut connection = self.connection().await?;

        // SET NX EX sets value and ttl atomically.
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(token.as_str())
            .arg("NX")
            .arg("EX")
            .arg(lease_seconds)
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to acquire scheduler lease: {error}"))
            })?;

        if acquired.is_none() {
            tracing::debug!(scope_key, holder_id, "scheduler lease held elsewhere");
            return Ok(None);
        }

        Ok(Some(SchedulerLease {
            scope_key: scope_key.to_owned(),
            holder_id: holder_id.to_owned(),
            token,
        }))
    }

    async fn release_lease(&self, lease: &SchedulerLease) -> AppResult<()> {
        let mut connection = self.connection().await?;

        Script::new(RELEASE_LEASE_SCRIPT)
            .key(self.key_for(lease.scope_key.as_str()))
            .arg(lease.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to release scheduler lease: {error}"))
            })?;

        Ok(())
    }

    async fn renew_lease(&self, lease: &SchedulerLease, lease_seconds: u32) -> AppResult<bool> {
        validate_lease_seconds(lease_seconds)?;
        let mut connection = self.connection().await?;

        let renewed = Script::new(RENEW_LEASE_SCRIPT)
            .key(self.key_for(lease.scope_key.as_str()))
            .arg(lease.token.as_str())
            .arg(i64::from(lease_seconds))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to renew scheduler lease: {error}"))
            })?;

        Ok(renewed > 0)
    }
}
