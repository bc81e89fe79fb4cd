use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use custodian_core::AppError;
use serde::Serialize;

/// API error payload. Carries the stable code and the public message only.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    code: &'static str,
    message: String,
}

/// HTTP API error wrapper around core application errors.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            AppError::AccessDenied => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::RetentionBlocked(_) => StatusCode::CONFLICT,
            AppError::AuditWriteFailure(_) | AppError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::PolicyNotFound(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }

        let payload = Json(ErrorResponse {
            code: self.0.code(),
            message: self.0.public_message(),
        });

        (status, payload).into_response()
    }
}

/// Standard API result type.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use custodian_core::AppError;

    use super::ApiError;

    #[test]
    fn denial_and_absence_share_one_status() {
        let response = ApiError(AppError::AccessDenied).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn audit_write_failure_is_reported_as_unavailable() {
        let response =
            ApiError(AppError::AuditWriteFailure("append exhausted".to_owned())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn legal_hold_conflict_maps_to_conflict() {
        let response =
            ApiError(AppError::RetentionBlocked("hold active".to_owned())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
