use std::sync::Arc;
use std::time::Duration;

use custodian_core::{AppError, AppResult};
use custodian_domain::{AuditEntry, OperationalEvent};

use crate::{AlertEvent, AlertNotifier, AuditLogStore, AuditReceipt};

/// Bounded retry settings for audit appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditRetryPolicy {
    /// Total append attempts, including the first.
    pub max_attempts: u32,
    /// Linear backoff step between attempts.
    pub backoff: Duration,
}

impl AuditRetryPolicy {
    /// Creates a validated retry policy.
    pub fn new(max_attempts: u32, backoff: Duration) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "audit write attempts must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            max_attempts,
            backoff,
        })
    }
}

impl Default for AuditRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Sole write path into the audit log.
///
/// Only [`AuditEntry`] values are accepted, so callers cannot hand resource
/// content to the log.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditLogStore>,
    notifier: Arc<dyn AlertNotifier>,
    retry: AuditRetryPolicy,
}

impl AuditRecorder {
    /// Creates a recorder.
    #[must_use]
    pub fn new(
        store: Arc<dyn AuditLogStore>,
        notifier: Arc<dyn AlertNotifier>,
        retry: AuditRetryPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Durably records one entry.
    ///
    /// Transient store errors are retried with linear backoff. Appends are
    /// idempotent by correlation id, so a retry after an ambiguous failure
    /// never duplicates a record. Exhaustion escalates an operational event
    /// and returns `AuditWriteFailure`.
    pub async fn record(&self, entry: AuditEntry) -> AppResult<AuditReceipt> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let error = match self.store.append(entry.clone()).await {
                Ok(receipt) => return Ok(receipt),
                Err(error) => error,
            };

            if error.is_transient() && attempt < self.retry.max_attempts {
                tracing::warn!(
                    attempt,
                    correlation_id = %entry.correlation_id(),
                    resource = %entry.resource(),
                    error = %error,
                    "audit append failed, retrying"
                );
                tokio::time::sleep(self.retry.backoff * attempt).await;
                continue;
            }

            tracing::error!(
                attempt,
                correlation_id = %entry.correlation_id(),
                resource = %entry.resource(),
                error = %error,
                "audit append failed"
            );
            self.escalate(OperationalEvent::AuditWriteFailed {
                resource: entry.resource().clone(),
                correlation_id: entry.correlation_id(),
            })
            .await;

            return Err(AppError::AuditWriteFailure(format!(
                "audit record for correlation '{}' was not persisted after {attempt} attempt(s): {error}",
                entry.correlation_id()
            )));
        }
    }

    /// Delivers an operational event. Delivery failures are logged only.
    pub async fn escalate(&self, event: OperationalEvent) {
        let code = event.code();
        if let Err(error) = self.notifier.notify(AlertEvent::Operational(event)).await {
            tracing::error!(code, error = %error, "failed to deliver operational event");
        }
    }
}

#[cfg(test)]
mod tests;
