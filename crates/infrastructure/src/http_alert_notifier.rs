use std::time::Duration;

use async_trait::async_trait;
use custodian_application::{AlertEvent, AlertNotifier};
use custodian_core::{AppError, AppResult};

/// Webhook notifier posting alert events as JSON with bounded retries.
pub struct HttpAlertNotifier {
    http_client: reqwest::Client,
    webhook_url: String,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl HttpAlertNotifier {
    /// Creates a notifier for one webhook endpoint.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        webhook_url: impl Into<String>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            webhook_url: webhook_url.into(),
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }
}

fn event_kind(event: &AlertEvent) -> String {
    match event {
        AlertEvent::Access(alert) => format!("access.{}", alert.rule),
        AlertEvent::Operational(event) => format!("operational.{}", event.code()),
    }
}

#[async_trait]
impl AlertNotifier for HttpAlertNotifier {
    async fn notify(&self, event: AlertEvent) -> AppResult<()> {
        let kind = event_kind(&event);
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = self
                .http_client
                .post(self.webhook_url.as_str())
                .header("X-Custodian-Alert", kind.as_str())
                .json(&event)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} delivering alert '{kind}'",
                        response.status()
                    ));
                }
                Ok(response) => {
                    return Err(AppError::Validation(format!(
                        "alert webhook rejected '{kind}' with status {}",
                        response.status()
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("alert webhook transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Unavailable(last_error.unwrap_or_else(|| {
            "alert webhook delivery exhausted retries".to_owned()
        })))
    }
}
