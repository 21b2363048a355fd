use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "status": "ok",
        "store": if state.config.database_url.is_some() { "postgres" } else { "memory" },
        "sandbox": if state.config.sandbox_url.is_some() { "judge0" } else { "local" },
    });
    (StatusCode::OK, Json(body))
}
