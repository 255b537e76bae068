//! Health check route

use axum::{
    Router,
    routing::get,
    extract::State,
    http::StatusCode,
    Json,
};

use crate::api::ApiState;
use crate::database::FeeStore;
use crate::models::HealthStatus;

pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

#[axum::debug_handler]
async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthStatus>) {
    let database = state.database.health_check().await;
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthStatus {
            status: status.to_string(),
            database,
            timestamp: chrono::Utc::now().timestamp(),
        }),
    )
}
