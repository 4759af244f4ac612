use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

/// Liveness probe. Reports whether the dispatcher still accepts work so load
/// balancers can drain during shutdown.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
  Json(json!({
    "status": "ok",
    "accepting_tasks": state.dispatcher.is_accepting(),
  }))
}
