use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

pub fn build_router(app_state: AppState) -> Router {
    let audit_routes = Router::new()
        .route(
            "/api/audit/resources/{resource_type}/{resource_id}",
            get(handlers::audit::resource_history_handler),
        )
        .route(
            "/api/audit/resources/{resource_type}/{resource_id}/verify",
            get(handlers::audit::verify_resource_chain_handler),
        )
        .route(
            "/api/audit/principals/{principal_id}",
            get(handlers::audit::principal_history_handler),
        )
        .route(
            "/api/audit/records",
            get(handlers::audit::time_range_history_handler),
        );

    let admin_routes = Router::new()
        .route(
            "/api/resources/{resource_type}/{resource_id}/legal-hold",
            post(handlers::admin::place_legal_hold_handler)
                .delete(handlers::admin::lift_legal_hold_handler),
        )
        .route(
            "/api/principals/{principal_id}/deactivate",
            post(handlers::admin::deactivate_principal_handler),
        )
        .route(
            "/api/policies/retention",
            post(handlers::admin::append_retention_policy_handler),
        )
        .route(
            "/api/policies/roles",
            post(handlers::admin::append_role_version_handler),
        );

    let gateway_routes = audit_routes
        .merge(admin_routes)
        .route_layer(from_fn_with_state(
            app_state.clone(),
            middleware::require_gateway_identity,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(gateway_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
