use std::sync::Arc;

use chrono::{Duration, Utc};
use pagetrail_core::analytics::{AggregationConfig, ObservationWindow};
use pagetrail_core::ingest::IngestionService;
use pagetrail_core::routes::RouteAllowList;
use pagetrail_core::store::VisitStore;
use pagetrail_core::visit::{BeginVisitRequest, Device, UpdateVisitRequest};
use pagetrail_duckdb::DuckDbBackend;

fn service() -> IngestionService {
    let db: Arc<dyn VisitStore> = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    IngestionService::new(db, RouteAllowList::default(), AggregationConfig::default())
}

fn begin(user: Option<&str>, visit_id: &str, route: &str, device: Device) -> BeginVisitRequest {
    BeginVisitRequest {
        user_key: user.map(str::to_string),
        visit_id: visit_id.to_string(),
        route: route.to_string(),
        device,
    }
}

async fn sync(service: &IngestionService, visit_id: &str, elapsed_seconds: u64) {
    let ack = service
        .update_visit(&UpdateVisitRequest {
            visit_id: visit_id.to_string(),
            elapsed_seconds,
        })
        .await;
    assert!(ack.ok, "update {visit_id} -> {elapsed_seconds}");
}

#[tokio::test]
async fn test_profile_visits_of_one_user() {
    let service = service();
    assert!(service.begin_visit(&begin(Some("u1"), "p1", "/profile", Device::Desktop)).await.ok);
    assert!(service.begin_visit(&begin(Some("u1"), "p2", "/profile", Device::Desktop)).await.ok);
    sync(&service, "p1", 10).await;
    sync(&service, "p2", 30).await;

    let metrics = service.get_deep_analytics().await.expect("analytics");
    let profile = &metrics.route_analytics["/profile"];
    assert_eq!(profile.logged_in.total_time, 40);
    assert_eq!(profile.avg_time_per_visit, 20.0);
    assert_eq!(profile.visits, 2);
    assert_eq!(profile.unique_logged_in_users, 1);
}

#[tokio::test]
async fn test_root_split_between_anonymous_and_logged_in() {
    let service = service();
    assert!(service.begin_visit(&begin(None, "anon", "/", Device::Mobile)).await.ok);
    assert!(service.begin_visit(&begin(Some("u1"), "known", "/", Device::Desktop)).await.ok);

    let global = service
        .get_deep_analytics()
        .await
        .expect("analytics")
        .global_metrics;
    assert_eq!(global.total_visits, 2);
    assert_eq!(global.unique_logged_in_users, 1);
    assert_eq!(global.anonymous.visits, 1);
    assert_eq!(global.avg_time_per_visit, 0.0);
}

#[tokio::test]
async fn test_rejected_route_never_reaches_analytics() {
    let service = service();
    assert!(!service.begin_visit(&begin(Some("u1"), "x", "/settings", Device::Desktop)).await.ok);
    let ack = service
        .update_visit(&UpdateVisitRequest {
            visit_id: "x".to_string(),
            elapsed_seconds: 99,
        })
        .await;
    assert!(!ack.ok);

    let metrics = service.get_deep_analytics().await.expect("analytics");
    assert_eq!(metrics.global_metrics.total_visits, 0);
    assert_eq!(metrics.global_metrics.bounce.overall, 0.0);
    assert_eq!(metrics.global_metrics.retention.overall, 0.0);
}

#[tokio::test]
async fn test_observation_window_excludes_older_visits() {
    let service = service();
    let long_ago = Utc::now() - Duration::days(30);
    service
        .begin_visit_at(&begin(Some("u1"), "old", "/", Device::Desktop), long_ago)
        .await;
    service
        .begin_visit(&begin(Some("u1"), "new", "/", Device::Desktop))
        .await;

    let everything = service.get_deep_analytics().await.expect("analytics");
    assert_eq!(everything.global_metrics.total_visits, 2);
    assert_eq!(everything.global_metrics.retention.logged_in.returning_users, 1);

    let recent = service
        .get_deep_analytics_in(&ObservationWindow {
            since: Some(Utc::now() - Duration::days(7)),
            until: None,
        })
        .await
        .expect("analytics");
    assert_eq!(recent.global_metrics.total_visits, 1);
    assert_eq!(recent.global_metrics.retention.logged_in.returning_users, 0);
    assert_eq!(recent.global_metrics.bounce.logged_in.rate, 1.0);
}
