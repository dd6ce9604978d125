use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use pagetrail_core::analytics::ObservationWindow;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct DeepAnalyticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// `GET /api/analytics/deep` — global and per-route metrics.
///
/// Without dates every stored visit is aggregated. `start_date` and
/// `end_date` (`YYYY-MM-DD`, UTC, inclusive) restrict the set by visit start.
#[tracing::instrument(skip(state))]
pub async fn get_deep_analytics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeepAnalyticsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let start = parse_date("start_date", query.start_date.as_deref())?;
    let end = parse_date("end_date", query.end_date.as_deref())?;
    let window = ObservationWindow::from_dates(start, end).ok_or_else(|| {
        AppError::BadRequest("end_date must not be before start_date".to_string())
    })?;

    let metrics = state.ingest.get_deep_analytics_in(&window).await?;
    Ok(Json(json!({ "data": metrics })))
}

fn parse_date(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| AppError::BadRequest(format!("{name} must be YYYY-MM-DD")))
        })
        .transpose()
}
