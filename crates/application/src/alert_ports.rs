use async_trait::async_trait;
use custodian_core::AppResult;
use custodian_domain::{AccessAlert, OperationalEvent};
use serde::{Deserialize, Serialize};

/// Event delivered to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum AlertEvent {
    /// Suspicious access pattern matched by a monitor rule.
    Access(AccessAlert),
    /// Engine condition that needs operator attention.
    Operational(OperationalEvent),
}

/// Notification sink for alert events.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Delivers one event.
    async fn notify(&self, event: AlertEvent) -> AppResult<()>;
}
