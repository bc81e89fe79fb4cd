use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use custodian_core::{AppError, ChannelTag, CorrelationId, PrincipalId, RequestContext};

use crate::error::ApiResult;
use crate::state::AppState;

pub const PRINCIPAL_HEADER: &str = "x-custodian-principal";
pub const CHANNEL_HEADER: &str = "x-custodian-channel";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Accepts only calls relayed by the trusted gateway and attaches the
/// caller's [`RequestContext`].
pub async fn require_gateway_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let context = gateway_context(request.headers(), state.gateway_secret.as_ref())?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub fn gateway_context(
    headers: &HeaderMap,
    gateway_secret: &str,
) -> Result<RequestContext, AppError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("gateway credential is missing".to_owned()))?;
    if !constant_time_eq(presented.as_bytes(), gateway_secret.as_bytes()) {
        return Err(AppError::Unauthorized("gateway credential is invalid".to_owned()));
    }

    let principal_id = PrincipalId::parse(required_header(headers, PRINCIPAL_HEADER)?)
        .map_err(|_| AppError::Unauthorized("caller principal is malformed".to_owned()))?;
    let channel = ChannelTag::new(required_header(headers, CHANNEL_HEADER)?)?;
    let correlation_id = match headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => CorrelationId::parse(value)?,
        None => CorrelationId::new(),
    };

    Ok(RequestContext::new(principal_id, channel, correlation_id))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("{name} header is required")))
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    left.iter()
        .zip(right)
        .fold(0_u8, |difference, (left, right)| difference | (left ^ right))
        == 0
}
