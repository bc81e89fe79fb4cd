use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use custodian_application::{
    AppendRetentionPolicyInput, AppendRoleVersionInput, PlaceLegalHoldInput,
};
use custodian_core::{PrincipalId, RequestContext};
use custodian_domain::ResourceRef;

use crate::dto::{
    LegalHoldResponse, PrincipalResponse, RetentionPolicyResponse, RoleVersionResponse,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn place_legal_hold_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    Json(payload): Json<PlaceLegalHoldInput>,
) -> ApiResult<(StatusCode, Json<LegalHoldResponse>)> {
    let resource = ResourceRef::parse(resource_type.as_str(), resource_id.as_str())?;
    let hold = state
        .administration_service
        .place_legal_hold(&context, resource, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(hold.into())))
}

pub async fn lift_legal_hold_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<LegalHoldResponse>> {
    let resource = ResourceRef::parse(resource_type.as_str(), resource_id.as_str())?;
    let hold = state
        .administration_service
        .lift_legal_hold(&context, resource)
        .await?;

    Ok(Json(hold.into()))
}

pub async fn deactivate_principal_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(principal_id): Path<String>,
) -> ApiResult<Json<PrincipalResponse>> {
    let principal_id = PrincipalId::parse(principal_id.as_str())?;
    let principal = state
        .administration_service
        .deactivate_principal(&context, principal_id)
        .await?;

    Ok(Json(principal.into()))
}

pub async fn append_role_version_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(payload): Json<AppendRoleVersionInput>,
) -> ApiResult<(StatusCode, Json<RoleVersionResponse>)> {
    let role = state
        .administration_service
        .append_role_version(&context, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(role.into())))
}

pub async fn append_retention_policy_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(payload): Json<AppendRetentionPolicyInput>,
) -> ApiResult<(StatusCode, Json<RetentionPolicyResponse>)> {
    let policy = state
        .administration_service
        .append_retention_policy(&context, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(policy.into())))
}
