use std::sync::Arc;

use custodian_application::{
    AccessMediator, AdministrationService, AlertNotifier, AuditQueryService, AuditRecorder,
    AuthorizationService, PolicyCache,
};
use custodian_core::AppError;
use custodian_infrastructure::{
    HttpAlertNotifier, PostgresAuditLogStore, PostgresPolicyRepository,
    PostgresResourceMetadataRepository, TracingAlertNotifier,
};
use sqlx::PgPool;

use crate::api_config::ApiConfig;
use crate::state::AppState;

use super::redis::build_redis_client;

pub fn build_app_state(pool: PgPool, config: &ApiConfig) -> Result<AppState, AppError> {
    let redis_client = config
        .redis_url
        .as_deref()
        .map(build_redis_client)
        .transpose()?;

    let policies = Arc::new(PostgresPolicyRepository::new(pool.clone()));
    let metadata = Arc::new(PostgresResourceMetadataRepository::new(pool.clone()));
    let audit_store = Arc::new(PostgresAuditLogStore::new(pool.clone()));
    let notifier: Arc<dyn AlertNotifier> = match &config.alert_webhook {
        Some(webhook) => Arc::new(HttpAlertNotifier::new(
            reqwest::Client::new(),
            webhook.url.as_str(),
            webhook.max_attempts,
            webhook.retry_backoff_ms,
        )),
        None => Arc::new(TracingAlertNotifier),
    };

    let policy_cache = PolicyCache::new(policies.clone(), config.policy_cache_staleness);
    let mediator = AccessMediator::new(
        AuthorizationService::new(policies.clone(), metadata.clone(), policy_cache.clone()),
        AuditRecorder::new(audit_store.clone(), notifier, config.audit_retry),
        metadata.clone(),
        config.mediation_timeout,
    )
    .with_decision_retry(config.decision_retry);

    Ok(AppState {
        audit_query_service: AuditQueryService::new(mediator.clone(), audit_store),
        administration_service: AdministrationService::new(
            mediator,
            metadata,
            policies.clone(),
            policies,
            policy_cache,
        ),
        postgres_pool: pool,
        redis_client,
        gateway_secret: Arc::from(config.gateway_secret.as_str()),
    })
}
