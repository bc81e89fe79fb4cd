use std::sync::Arc;

use custodian_application::{AdministrationService, AuditQueryService};
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub audit_query_service: AuditQueryService,
    pub administration_service: AdministrationService,
    pub postgres_pool: PgPool,
    pub redis_client: Option<redis::Client>,
    pub gateway_secret: Arc<str>,
}
