use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{Extensions, HeaderMap},
    Json,
};

use pagetrail_core::visit::{
    BeginVisitRequest, IngestAck, ReconcileVisitsRequest, UpdateVisitRequest,
};

use crate::{error::AppError, state::AppState};

/// `POST /api/visits/begin` — register a new visit.
///
/// Always `200` for a well-formed body. An untracked route or empty
/// `visitId` is `{ "ok": false }`; a repeated `visitId` is `{ "ok": true }`
/// and leaves the stored visit untouched.
#[tracing::instrument(skip(state, headers, extensions, payload))]
pub async fn begin_visit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<BeginVisitRequest>, JsonRejection>,
) -> Result<Json<IngestAck>, AppError> {
    admit(&state, &headers, &extensions).await?;
    let Json(req) = payload.map_err(malformed)?;
    Ok(Json(state.ingest.begin_visit(&req).await))
}

/// `POST /api/visits/update` — heartbeat or final flush of elapsed seconds.
///
/// The stored value only grows; an older value is acknowledged and dropped.
/// An unknown `visitId` is `{ "ok": false }`.
#[tracing::instrument(skip(state, headers, extensions, payload))]
pub async fn update_visit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<UpdateVisitRequest>, JsonRejection>,
) -> Result<Json<IngestAck>, AppError> {
    admit(&state, &headers, &extensions).await?;
    let Json(req) = payload.map_err(malformed)?;
    Ok(Json(state.ingest.update_visit(&req).await))
}

/// `POST /api/visits/reconcile` — close the caller's visits left open by
/// other tabs or crashed sessions. Anonymous callers get `{ "ok": true }`
/// and nothing changes.
#[tracing::instrument(skip(state, headers, extensions, payload))]
pub async fn reconcile_visits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<ReconcileVisitsRequest>, JsonRejection>,
) -> Result<Json<IngestAck>, AppError> {
    admit(&state, &headers, &extensions).await?;
    let Json(req) = payload.map_err(malformed)?;
    Ok(Json(state.ingest.reconcile_stale_visits(&req).await))
}

async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> Result<(), AppError> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = extract_client_ip(headers, peer);
    if state.check_rate_limit(&client_ip).await {
        Ok(())
    } else {
        tracing::debug!(client_ip = %client_ip, "Ingestion rate limit hit");
        Err(AppError::RateLimited)
    }
}

fn malformed(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

/// First `X-Forwarded-For` entry, else the TCP peer address, else `"unknown"`.
fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
