use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware, outermost first:
///
/// 1. `TraceLayer` — structured request/response logging via `tracing`.
/// 2. `CorsLayer` — trackers run in the browser on the product's origin;
///    `PAGETRAIL_CORS_ORIGINS` narrows the allowed origins, empty means any.
///
/// The analytics route is gzip-compressed; its payload grows with the
/// allow-list.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/routes", get(routes::tracked::list_tracked_routes))
        .route("/api/visits/begin", post(routes::visits::begin_visit))
        .route("/api/visits/update", post(routes::visits::update_visit))
        .route("/api/visits/reconcile", post(routes::visits::reconcile_visits))
        .route(
            "/api/analytics/deep",
            get(routes::analytics::get_deep_analytics).layer(CompressionLayer::new()),
        )
        .fallback(|| async { AppError::NotFound("Route not found".to_string()) })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
