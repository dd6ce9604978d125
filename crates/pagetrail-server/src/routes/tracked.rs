use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /api/routes` — the allow-list in effect, in configured order.
pub async fn list_tracked_routes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "data": state.ingest.routes() }))
}
