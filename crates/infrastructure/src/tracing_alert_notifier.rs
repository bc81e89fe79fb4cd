use async_trait::async_trait;
use custodian_application::{AlertEvent, AlertNotifier};
use custodian_core::AppResult;

/// Notifier that writes alert events to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertNotifier;

#[async_trait]
impl AlertNotifier for TracingAlertNotifier {
    async fn notify(&self, event: AlertEvent) -> AppResult<()> {
        match &event {
            AlertEvent::Access(alert) => tracing::warn!(
                rule = %alert.rule,
                principal_id = %alert.principal_id,
                event_count = alert.event_count,
                window_start = %alert.window_start,
                trigger_record_id = alert.trigger_record_id,
                resource = %alert.resource,
                "access alert"
            ),
            AlertEvent::Operational(operational) => tracing::error!(
                code = operational.code(),
                resource = %operational.resource(),
                "operational alert"
            ),
        }
        Ok(())
    }
}
