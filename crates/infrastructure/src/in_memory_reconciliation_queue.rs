use async_trait::async_trait;
use custodian_application::{ReconciliationItem, ReconciliationQueue};
use custodian_core::AppResult;
use tokio::sync::RwLock;

/// In-memory queue of operations awaiting manual reconciliation.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationQueue {
    items: RwLock<Vec<ReconciliationItem>>,
}

impl InMemoryReconciliationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every flagged item.
    pub async fn items(&self) -> Vec<ReconciliationItem> {
        self.items.read().await.clone()
    }
}

#[async_trait]
impl ReconciliationQueue for InMemoryReconciliationQueue {
    async fn enqueue(&self, item: ReconciliationItem) -> AppResult<()> {
        tracing::error!(
            resource = %item.resource,
            action = item.action.as_str(),
            correlation_id = %item.correlation_id,
            "operation flagged for reconciliation"
        );
        let mut items = self.items.write().await;
        if !items
            .iter()
            .any(|existing| existing.correlation_id == item.correlation_id)
        {
            items.push(item);
        }
        Ok(())
    }
}
