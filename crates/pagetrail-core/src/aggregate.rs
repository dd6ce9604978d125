//! Deep analytics aggregation.
//!
//! Pure read-side computation: everything is derived from the record set
//! passed in, so the same records always produce the same metrics and tests
//! need no store at all.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::analytics::{
    AggregateMetrics, AggregationConfig, DeviceBreakdown, GlobalBounce, GlobalMetrics,
    GlobalRetention, Rate, ReturningUsers, RouteBounce, RouteMetrics, RouteRetention,
    SegmentMetrics,
};
use crate::routes::RouteAllowList;
use crate::visit::{Device, VisitRecord};

/// Compute global and per-route metrics over `records`.
///
/// Records on routes outside `routes` are ignored. Every tracked route gets an
/// entry in `route_analytics`, even with zero visits.
pub fn compute_deep_analytics(
    records: &[VisitRecord],
    routes: &RouteAllowList,
    config: &AggregationConfig,
    now: DateTime<Utc>,
) -> AggregateMetrics {
    let tracked: Vec<&VisitRecord> = records
        .iter()
        .filter(|r| routes.contains(&r.route))
        .collect();

    let mut by_route: BTreeMap<&str, Vec<&VisitRecord>> =
        routes.iter().map(|route| (route, Vec::new())).collect();
    for record in tracked.iter().copied() {
        if let Some(canonical) = routes.resolve(&record.route) {
            by_route.entry(canonical).or_default().push(record);
        }
    }

    let route_analytics = by_route
        .into_iter()
        .map(|(route, visits)| (route.to_string(), route_metrics(&visits, config)))
        .collect();

    AggregateMetrics {
        global_metrics: global_metrics(&tracked, config),
        route_analytics,
        session_window_minutes: config.session_window.num_minutes(),
        computed_at: now,
    }
}

fn global_metrics(visits: &[&VisitRecord], config: &AggregationConfig) -> GlobalMetrics {
    let all = Tally::from_visits(visits.iter().copied());
    let logged_in = Tally::from_visits(visits.iter().copied().filter(|r| r.is_logged_in()));
    let anonymous = Tally::from_visits(visits.iter().copied().filter(|r| !r.is_logged_in()));
    let engagement = Engagement::measure(visits, config);

    GlobalMetrics {
        total_visits: all.visits,
        unique_logged_in_users: all.unique_users(),
        total_time_spent: all.total_time,
        avg_time_per_visit: all.avg_time(),
        logged_in: logged_in.segment(),
        anonymous: anonymous.segment(),
        retention: GlobalRetention {
            overall: engagement.retention_rate(),
            logged_in: ReturningUsers {
                returning_users: engagement.returning_users,
            },
        },
        bounce: GlobalBounce {
            overall: engagement.bounce_rate(),
            logged_in: Rate {
                rate: ratio(engagement.logged_in_bounces, engagement.logged_in_visits),
            },
            anonymous: Rate {
                rate: ratio(engagement.anonymous_bounces, engagement.anonymous_visits),
            },
        },
    }
}

fn route_metrics(visits: &[&VisitRecord], config: &AggregationConfig) -> RouteMetrics {
    let all = Tally::from_visits(visits.iter().copied());
    let logged_in = Tally::from_visits(visits.iter().copied().filter(|r| r.is_logged_in()));
    let anonymous = Tally::from_visits(visits.iter().copied().filter(|r| !r.is_logged_in()));
    let engagement = Engagement::measure(visits, config);

    RouteMetrics {
        visits: all.visits,
        unique_logged_in_users: all.unique_users(),
        total_time: all.total_time,
        avg_time_per_visit: all.avg_time(),
        devices: all.devices.clone(),
        logged_in: logged_in.segment(),
        anonymous: anonymous.segment(),
        retention: RouteRetention {
            rate: engagement.retention_rate(),
            returning_users: engagement.returning_users,
        },
        bounce: RouteBounce {
            rate: engagement.bounce_rate(),
            bounces: engagement.bounces(),
        },
    }
}

/// `num / den`, or 0 when there is nothing to divide by.
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Running sums over one slice of visits.
#[derive(Default)]
struct Tally<'a> {
    visits: u64,
    total_time: u64,
    users: BTreeSet<&'a str>,
    devices: DeviceBreakdown,
}

impl<'a> Tally<'a> {
    fn from_visits(visits: impl Iterator<Item = &'a VisitRecord>) -> Self {
        let mut tally = Tally::default();
        for visit in visits {
            tally.visits += 1;
            tally.total_time = tally.total_time.saturating_add(visit.elapsed_seconds);
            if let Some(user) = visit.user_key.as_deref() {
                tally.users.insert(user);
            }
            match visit.device {
                Device::Desktop => tally.devices.desktop += 1,
                Device::Mobile => tally.devices.mobile += 1,
                Device::Tablet => tally.devices.tablet += 1,
                Device::Unknown => tally.devices.unknown += 1,
            }
        }
        tally
    }

    fn unique_users(&self) -> u64 {
        self.users.len() as u64
    }

    fn avg_time(&self) -> f64 {
        ratio(self.total_time, self.visits)
    }

    fn segment(&self) -> SegmentMetrics {
        SegmentMetrics {
            visits: self.visits,
            unique_logged_in_users: self.unique_users(),
            total_time: self.total_time,
            avg_time_per_visit: self.avg_time(),
            devices: self.devices.clone(),
        }
    }
}

/// Session-based counts behind retention and bounce.
#[derive(Debug, Default, PartialEq, Eq)]
struct Engagement {
    unique_users: u64,
    returning_users: u64,
    logged_in_visits: u64,
    logged_in_bounces: u64,
    anonymous_visits: u64,
    anonymous_bounces: u64,
}

impl Engagement {
    /// A user's visits, ordered by start, stay in one session while
    /// consecutive starts are at most `session_window` apart. Users with more
    /// than one session are returning; visits alone in their session bounce.
    /// An anonymous visit has no lineage beyond its own id, so it always
    /// bounces.
    fn measure(visits: &[&VisitRecord], config: &AggregationConfig) -> Self {
        let mut starts_by_user: BTreeMap<&str, Vec<DateTime<Utc>>> = BTreeMap::new();
        let mut out = Engagement::default();

        for visit in visits {
            match visit.user_key.as_deref() {
                Some(user) => {
                    out.logged_in_visits += 1;
                    starts_by_user.entry(user).or_default().push(visit.started_at);
                }
                None => {
                    out.anonymous_visits += 1;
                    out.anonymous_bounces += 1;
                }
            }
        }

        out.unique_users = starts_by_user.len() as u64;
        for starts in starts_by_user.values_mut() {
            let sessions = session_sizes(starts, config.session_window);
            if sessions.len() > 1 {
                out.returning_users += 1;
            }
            out.logged_in_bounces += sessions.iter().filter(|size| **size == 1).count() as u64;
        }
        out
    }

    fn bounces(&self) -> u64 {
        self.logged_in_bounces + self.anonymous_bounces
    }

    fn retention_rate(&self) -> f64 {
        ratio(self.returning_users, self.unique_users)
    }

    fn bounce_rate(&self) -> f64 {
        ratio(self.bounces(), self.logged_in_visits + self.anonymous_visits)
    }
}

/// Split sorted visit starts into sessions and return the size of each.
fn session_sizes(starts: &mut [DateTime<Utc>], window: chrono::Duration) -> Vec<usize> {
    starts.sort_unstable();
    let mut sizes = Vec::new();
    let mut iter = starts.iter();
    let Some(mut prev) = iter.next() else {
        return sizes;
    };
    let mut current = 1;
    for start in iter {
        if *start - *prev <= window {
            current += 1;
        } else {
            sizes.push(current);
            current = 1;
        }
        prev = start;
    }
    sizes.push(current);
    sizes
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn visit(
        id: &str,
        user: Option<&str>,
        route: &str,
        device: Device,
        elapsed: u64,
        offset_minutes: i64,
    ) -> VisitRecord {
        let started = t0() + Duration::minutes(offset_minutes);
        let mut record = VisitRecord::new(id, user.map(str::to_string), route, device, started);
        record.elapsed_seconds = elapsed;
        record
    }

    fn compute(records: &[VisitRecord]) -> AggregateMetrics {
        compute_deep_analytics(
            records,
            &RouteAllowList::default(),
            &AggregationConfig::default(),
            t0(),
        )
    }

    #[test]
    fn empty_record_set_yields_zero_ratios() {
        let metrics = compute(&[]);
        let global = &metrics.global_metrics;
        assert_eq!(global.total_visits, 0);
        assert_eq!(global.avg_time_per_visit, 0.0);
        assert_eq!(global.retention.overall, 0.0);
        assert_eq!(global.bounce.overall, 0.0);
        assert_eq!(global.bounce.logged_in.rate, 0.0);
        assert_eq!(global.bounce.anonymous.rate, 0.0);
        for route in RouteAllowList::default().iter() {
            let m = &metrics.route_analytics[route];
            assert_eq!(m.visits, 0);
            assert_eq!(m.avg_time_per_visit, 0.0);
            assert_eq!(m.retention.rate, 0.0);
            assert_eq!(m.bounce.rate, 0.0);
        }
    }

    #[test]
    fn two_profile_visits_of_one_user_sum_and_average() {
        let records = vec![
            visit("a", Some("u1"), "/profile", Device::Desktop, 10, 0),
            visit("b", Some("u1"), "/profile", Device::Desktop, 30, 5),
        ];
        let metrics = compute(&records);
        let profile = &metrics.route_analytics["/profile"];
        assert_eq!(profile.logged_in.total_time, 40);
        assert_eq!(profile.avg_time_per_visit, 20.0);
        assert_eq!(profile.logged_in.avg_time_per_visit, 20.0);
        assert_eq!(profile.unique_logged_in_users, 1);
    }

    #[test]
    fn anonymous_and_logged_in_visits_on_root_are_split() {
        let records = vec![
            visit("a", None, "/", Device::Mobile, 4, 0),
            visit("b", Some("u1"), "/", Device::Desktop, 6, 0),
        ];
        let global = compute(&records).global_metrics;
        assert_eq!(global.total_visits, 2);
        assert_eq!(global.unique_logged_in_users, 1);
        assert_eq!(global.anonymous.visits, 1);
        assert_eq!(global.logged_in.visits, 1);
        assert_eq!(global.total_time_spent, 10);
        assert_eq!(global.avg_time_per_visit, 5.0);
    }

    #[test]
    fn single_visit_user_bounces_but_is_not_returning() {
        let records = vec![visit("a", Some("solo"), "/about", Device::Desktop, 12, 0)];
        let global = compute(&records).global_metrics;
        assert_eq!(global.bounce.overall, 1.0);
        assert_eq!(global.bounce.logged_in.rate, 1.0);
        assert_eq!(global.retention.logged_in.returning_users, 0);
        assert_eq!(global.retention.overall, 0.0);
    }

    #[test]
    fn visits_beyond_the_session_window_make_a_returning_user() {
        let records = vec![
            visit("a", Some("u1"), "/", Device::Desktop, 5, 0),
            visit("b", Some("u1"), "/about", Device::Desktop, 5, 10),
            visit("c", Some("u1"), "/", Device::Desktop, 5, 24 * 60),
            visit("d", Some("u2"), "/", Device::Mobile, 5, 0),
            visit("e", Some("u2"), "/about", Device::Mobile, 5, 3),
        ];
        let global = compute(&records).global_metrics;
        // u1 has two sessions, u2 one.
        assert_eq!(global.retention.logged_in.returning_users, 1);
        assert_eq!(global.retention.overall, 0.5);
        // Only u1's next-day visit stands alone in its session.
        assert_eq!(global.bounce.logged_in.rate, 1.0 / 5.0);
    }

    #[test]
    fn session_chains_through_consecutive_visits() {
        // Each gap is 20 minutes (inside a 30 minute window) even though the
        // first and last starts are 60 minutes apart.
        let records: Vec<VisitRecord> = (0..4)
            .map(|i| visit(&format!("v{i}"), Some("u1"), "/", Device::Desktop, 1, i * 20))
            .collect();
        let global = compute(&records).global_metrics;
        assert_eq!(global.retention.logged_in.returning_users, 0);
        assert_eq!(global.bounce.logged_in.rate, 0.0);
    }

    #[test]
    fn anonymous_visits_always_bounce() {
        let records = vec![
            visit("a", None, "/", Device::Desktop, 5, 0),
            visit("b", None, "/", Device::Desktop, 5, 1),
            visit("c", Some("u1"), "/", Device::Desktop, 5, 0),
            visit("d", Some("u1"), "/", Device::Desktop, 5, 1),
        ];
        let global = compute(&records).global_metrics;
        assert_eq!(global.bounce.anonymous.rate, 1.0);
        assert_eq!(global.bounce.logged_in.rate, 0.0);
        assert_eq!(global.bounce.overall, 0.5);
    }

    #[test]
    fn untracked_routes_are_ignored() {
        let records = vec![
            visit("a", Some("u1"), "/admin", Device::Desktop, 100, 0),
            visit("b", Some("u1"), "/about", Device::Desktop, 7, 0),
        ];
        let metrics = compute(&records);
        assert_eq!(metrics.global_metrics.total_visits, 1);
        assert_eq!(metrics.global_metrics.total_time_spent, 7);
        assert!(!metrics.route_analytics.contains_key("/admin"));
    }

    #[test]
    fn every_tracked_route_is_reported() {
        let metrics = compute(&[visit("a", None, "/chat", Device::Tablet, 1, 0)]);
        let routes = RouteAllowList::default();
        assert_eq!(metrics.route_analytics.len(), routes.len());
        for route in routes.iter() {
            assert!(metrics.route_analytics.contains_key(route), "missing {route}");
        }
    }

    #[test]
    fn device_breakdown_per_route_and_segment() {
        let records = vec![
            visit("a", None, "/about", Device::Mobile, 1, 0),
            visit("b", Some("u1"), "/about", Device::Mobile, 1, 0),
            visit("c", Some("u2"), "/about", Device::Desktop, 1, 0),
            visit("d", Some("u3"), "/about", Device::Tablet, 1, 0),
        ];
        let about = compute(&records).route_analytics["/about"].clone();
        assert_eq!(
            about.devices,
            DeviceBreakdown {
                desktop: 1,
                mobile: 2,
                tablet: 1,
                unknown: 0
            }
        );
        assert_eq!(about.anonymous.devices.mobile, 1);
        assert_eq!(about.logged_in.devices.mobile, 1);
        assert_eq!(about.logged_in.devices.desktop, 1);
        assert_eq!(about.logged_in.devices.tablet, 1);
    }

    #[test]
    fn route_retention_only_counts_that_route() {
        let records = vec![
            visit("a", Some("u1"), "/teams", Device::Desktop, 5, 0),
            visit("b", Some("u1"), "/teams", Device::Desktop, 5, 3 * 60),
            visit("c", Some("u1"), "/ideas", Device::Desktop, 5, 0),
        ];
        let metrics = compute(&records);
        assert_eq!(metrics.route_analytics["/teams"].retention.rate, 1.0);
        assert_eq!(metrics.route_analytics["/teams"].retention.returning_users, 1);
        assert_eq!(metrics.route_analytics["/ideas"].retention.rate, 0.0);
        assert_eq!(metrics.route_analytics["/ideas"].bounce.bounces, 1);
    }

    #[test]
    fn rates_stay_within_unit_interval() {
        let mut records = Vec::new();
        for i in 0..40i64 {
            let user = match i % 4 {
                0 => None,
                1 => Some("u1"),
                2 => Some("u2"),
                _ => Some("u3"),
            };
            let route = ["/", "/about", "/profile"][(i % 3) as usize];
            records.push(visit(&format!("v{i}"), user, route, Device::Desktop, i as u64, i * 17));
        }
        let metrics = compute(&records);
        let g = &metrics.global_metrics;
        for rate in [
            g.retention.overall,
            g.bounce.overall,
            g.bounce.logged_in.rate,
            g.bounce.anonymous.rate,
        ] {
            assert!((0.0..=1.0).contains(&rate), "rate out of range: {rate}");
        }
        for m in metrics.route_analytics.values() {
            assert!((0.0..=1.0).contains(&m.retention.rate));
            assert!((0.0..=1.0).contains(&m.bounce.rate));
            if m.visits > 0 {
                assert_eq!(m.avg_time_per_visit, m.total_time as f64 / m.visits as f64);
            }
        }
    }

    #[test]
    fn serializes_with_dashboard_keys() {
        let records = vec![visit("a", Some("u1"), "/profile", Device::Desktop, 10, 0)];
        let json = serde_json::to_value(compute(&records)).expect("serialize");
        assert_eq!(json["globalMetrics"]["totalVisits"], 1);
        assert_eq!(json["globalMetrics"]["retention"]["loggedIn"]["returningUsers"], 0);
        assert_eq!(json["globalMetrics"]["bounce"]["anonymous"]["rate"], 0.0);
        assert_eq!(json["routeAnalytics"]["/profile"]["loggedIn"]["totalTime"], 10);
        assert_eq!(json["routeAnalytics"]["/profile"]["devices"]["desktop"], 1);
    }

    #[test]
    fn session_sizes_splits_on_gaps() {
        let mut starts = vec![
            t0() + Duration::minutes(100),
            t0(),
            t0() + Duration::minutes(10),
        ];
        assert_eq!(session_sizes(&mut starts, Duration::minutes(30)), vec![2, 1]);
        assert!(session_sizes(&mut [], Duration::minutes(30)).is_empty());
    }
}
