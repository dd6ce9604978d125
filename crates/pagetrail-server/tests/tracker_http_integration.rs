use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pagetrail_core::config::Config;
use pagetrail_core::routes::RouteAllowList;
use pagetrail_core::store::VisitStore;
use pagetrail_core::visit::Device;
use pagetrail_duckdb::DuckDbBackend;
use pagetrail_server::app::build_app;
use pagetrail_server::state::AppState;
use pagetrail_tracker::{
    run_tracker, HttpIngestClient, IngestClient, SessionTracker, TrackerConfig, TrackerHandle,
};

async fn serve() -> (Arc<AppState>, String) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, Config::default()));
    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });
    (state, format!("http://{addr}"))
}

#[tokio::test]
async fn tracker_reports_over_http() {
    let (state, base_url) = serve().await;
    let client: Arc<dyn IngestClient> =
        Arc::new(HttpIngestClient::new(&base_url).expect("client"));

    let tracker = SessionTracker::new(
        Some("u1".to_string()),
        Some(Device::Desktop),
        RouteAllowList::default(),
        TrackerConfig {
            tick: Duration::from_millis(10),
            sync_interval_ticks: 5,
        },
    )
    .with_visit_ids(|| "http-visit".to_string());

    let (handle, rx) = TrackerHandle::channel();
    let task = tokio::spawn(run_tracker(tracker, client, rx));

    handle.navigate("/teams");
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.teardown();

    let flush = task.await.expect("driver task");
    flush.expect("final flush").await.expect("flush task");

    let visit = state
        .db
        .get_visit("http-visit")
        .await
        .expect("get")
        .expect("stored over HTTP");
    assert_eq!(visit.route, "/teams");
    assert_eq!(visit.device, Device::Desktop);
    assert!(visit.elapsed_seconds > 0);
}

#[tokio::test]
async fn http_client_surfaces_rejections_as_acks() {
    let (_state, base_url) = serve().await;
    let client = HttpIngestClient::new(&base_url).expect("client");

    let ack = client
        .update_visit(&pagetrail_core::visit::UpdateVisitRequest {
            visit_id: "never-begun".to_string(),
            elapsed_seconds: 10,
        })
        .await
        .expect("transport ok");
    assert!(!ack.ok);
}

#[tokio::test]
async fn http_client_reports_unreachable_server_as_error() {
    let client = HttpIngestClient::new("http://127.0.0.1:9").expect("client");
    let result = client
        .reconcile_stale_visits(&pagetrail_core::visit::ReconcileVisitsRequest {
            user_key: Some("u1".to_string()),
        })
        .await;
    assert!(result.is_err());
}
