//! Result types of the deep analytics query.
//!
//! Serialized in camelCase: the dashboard reads these keys directly
//! (`globalMetrics.totalVisits`, `routeAnalytics["/about"].loggedIn.totalTime`).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Tuning for the derived metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Two visits of the same user belong to one browsing session while their
    /// starts are no further apart than this.
    pub session_window: chrono::Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            session_window: chrono::Duration::minutes(30),
        }
    }
}

/// Optional time bounds on the aggregated record set (by `started_at`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ObservationWindow {
    /// Whole UTC days, both ends inclusive. Returns `None` when `end` falls
    /// before `start`.
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return None;
            }
        }
        Some(Self {
            since: start.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|t| t.and_utc()),
            until: end
                .and_then(|d| d.succ_opt())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceBreakdown {
    pub desktop: u64,
    pub mobile: u64,
    pub tablet: u64,
    pub unknown: u64,
}

/// Visit volume and dwell time of one slice (logged-in or anonymous).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetrics {
    pub visits: u64,
    pub unique_logged_in_users: u64,
    pub total_time: u64,
    pub avg_time_per_visit: f64,
    pub devices: DeviceBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturningUsers {
    pub returning_users: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRetention {
    /// Returning users ÷ unique logged-in users.
    pub overall: f64,
    pub logged_in: ReturningUsers,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rate {
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalBounce {
    pub overall: f64,
    pub logged_in: Rate,
    pub anonymous: Rate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    pub total_visits: u64,
    pub unique_logged_in_users: u64,
    pub total_time_spent: u64,
    pub avg_time_per_visit: f64,
    pub logged_in: SegmentMetrics,
    pub anonymous: SegmentMetrics,
    pub retention: GlobalRetention,
    pub bounce: GlobalBounce,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRetention {
    pub rate: f64,
    pub returning_users: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteBounce {
    pub rate: f64,
    pub bounces: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMetrics {
    pub visits: u64,
    pub unique_logged_in_users: u64,
    pub total_time: u64,
    pub avg_time_per_visit: f64,
    pub devices: DeviceBreakdown,
    pub logged_in: SegmentMetrics,
    pub anonymous: SegmentMetrics,
    pub retention: RouteRetention,
    pub bounce: RouteBounce,
}

/// Everything `GET /api/analytics/deep` returns. Derived, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub global_metrics: GlobalMetrics,
    /// One entry per tracked route, including routes with no visits.
    pub route_analytics: BTreeMap<String, RouteMetrics>,
    pub session_window_minutes: i64,
    pub computed_at: DateTime<Utc>,
}
