use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use delguur_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    pool: DbPool,
}

pub fn router(pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { pool })
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub checked_at: DateTime<Utc>,
}

async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.pool).await;
    let healthy = database.status == "ok";

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        database,
        checked_at: Utc::now(),
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ok", detail: None },
        Err(error) => HealthCheck { status: "unavailable", detail: Some(error.to_string()) },
    }
}
