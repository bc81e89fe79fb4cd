use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use custodian_application::{AuditQuery, ChainVerification};
use custodian_core::{PrincipalId, RequestContext};
use custodian_domain::ResourceRef;

use crate::dto::{AuditPageResponse, PageQuery, TimeRangeQuery};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn resource_history_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<AuditPageResponse>> {
    let resource = ResourceRef::parse(resource_type.as_str(), resource_id.as_str())?;
    let page = state
        .audit_query_service
        .history(
            &context,
            AuditQuery::ByResource(resource),
            page.cursor,
            page.limit_or_default(),
        )
        .await?;

    Ok(Json(page.into()))
}

pub async fn verify_resource_chain_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<ChainVerification>> {
    let resource = ResourceRef::parse(resource_type.as_str(), resource_id.as_str())?;
    let verification = state
        .audit_query_service
        .verify_resource_chain(&context, resource)
        .await?;

    if let Some(chain_break) = &verification.first_break {
        tracing::error!(
            resource = %verification.resource,
            record_id = chain_break.record_id,
            sequence = chain_break.sequence,
            "audit chain verification failed"
        );
    }

    Ok(Json(verification))
}

pub async fn principal_history_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(principal_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<AuditPageResponse>> {
    let principal_id = PrincipalId::parse(principal_id.as_str())?;
    let page = state
        .audit_query_service
        .history(
            &context,
            AuditQuery::ByPrincipal(principal_id),
            page.cursor,
            page.limit_or_default(),
        )
        .await?;

    Ok(Json(page.into()))
}

pub async fn time_range_history_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(range): Query<TimeRangeQuery>,
) -> ApiResult<Json<AuditPageResponse>> {
    let query = AuditQuery::time_range(range.from, range.to)?;
    let limit = PageQuery {
        cursor: range.cursor,
        limit: range.limit,
    }
    .limit_or_default();
    let page = state
        .audit_query_service
        .history(&context, query, range.cursor, limit)
        .await?;

    Ok(Json(page.into()))
}
