use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;

/// Health probe payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    ready: bool,
    postgres: &'static str,
    redis: &'static str,
}

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    probe(state).await
}

pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    probe(state).await
}

async fn probe(state: AppState) -> (StatusCode, Json<HealthResponse>) {
    let postgres_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.postgres_pool)
        .await
        .is_ok();

    let redis = match &state.redis_client {
        Some(client) => {
            if check_redis(client).await {
                "ok"
            } else {
                "down"
            }
        }
        None => "disabled",
    };

    // Redis is optional infrastructure; readiness hinges on Postgres only.
    let ready = postgres_ok;
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
            postgres: if postgres_ok { "ok" } else { "down" },
            redis,
        }),
    )
}

async fn check_redis(client: &redis::Client) -> bool {
    let Ok(mut connection) = client.get_multiplexed_async_connection().await else {
        return false;
    };

    redis::cmd("PING")
        .query_async::<String>(&mut connection)
        .await
        .is_ok()
}
