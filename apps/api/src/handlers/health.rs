use std::fmt::Display;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::warn;

use crate::dto::{HealthDependencyStatus, HealthResponse};
use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgres = check_postgres(&state.postgres_pool).await;
    let redis = check_redis(state.redis_client.clone()).await;

    let ready = postgres.status == "ok" && redis.status != "error";
    let http_status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "degraded" },
            ready,
            postgres,
            redis,
        }),
    )
}

fn healthy() -> HealthDependencyStatus {
    HealthDependencyStatus {
        status: "ok",
        detail: None,
    }
}

fn unhealthy(
    dependency: &str,
    category: &'static str,
    error: impl Display,
) -> HealthDependencyStatus {
    warn!(dependency, category, error = %error, "health check failed");
    HealthDependencyStatus {
        status: "error",
        detail: Some(category),
    }
}

async fn check_postgres(pool: &sqlx::PgPool) -> HealthDependencyStatus {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => healthy(),
        Err(error) => unhealthy("postgres", "query failed", error),
    }
}

async fn check_redis(redis_client: Option<redis::Client>) -> HealthDependencyStatus {
    let Some(redis_client) = redis_client else {
        return HealthDependencyStatus {
            status: "disabled",
            detail: None,
        };
    };

    let mut connection = match redis_client.get_multiplexed_async_connection().await {
        Ok(connection) => connection,
        Err(error) => return unhealthy("redis", "connection failed", error),
    };

    match redis::cmd("PING").query_async::<String>(&mut connection).await {
        Ok(value) if value.eq_ignore_ascii_case("pong") => healthy(),
        Ok(value) => unhealthy("redis", "unexpected ping response", value),
        Err(error) => unhealthy("redis", "ping failed", error),
    }
}

#[cfg(test)]
mod tests {
    use super::unhealthy;

    #[test]
    fn failed_check_reports_a_category_without_driver_text() {
        let status = unhealthy(
            "postgres",
            "query failed",
            "password authentication failed for user \"custodian\" at 10.0.4.12:5432",
        );

        assert_eq!(status.status, "error");
        assert_eq!(status.detail, Some("query failed"));
    }
}
