//! Visit record storage abstraction.

use chrono::{DateTime, Utc};

use crate::visit::VisitRecord;

/// Range-scan filter. Every field narrows the result; `Default` scans everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitFilter {
    /// Inclusive lower bound on `started_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `started_at`.
    pub until: Option<DateTime<Utc>>,
    pub route: Option<String>,
    pub user_key: Option<String>,
    pub open_only: bool,
}

impl VisitFilter {
    pub fn matches(&self, record: &VisitRecord) -> bool {
        let after_since = self.since.map_or(true, |since| record.started_at >= since);
        let before_until = self.until.map_or(true, |until| record.started_at < until);
        let on_route = self.route.as_ref().map_or(true, |route| record.route == *route);
        let by_user = self
            .user_key
            .as_ref()
            .map_or(true, |user| record.user_key.as_ref() == Some(user));
        after_since && before_until && on_route && by_user && (!self.open_only || record.is_open())
    }
}

/// Outcome of a compare-and-set elapsed-time update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The stored value was ≤ the new value and has been replaced.
    Advanced,
    /// The stored value is larger; nothing was written.
    Stale,
    /// No record with that `visit_id`.
    Unknown,
}

/// Durable keyed storage for visit records.
///
/// Implementations must apply `advance_elapsed` as a single conditional write
/// (never read-then-write across two lock acquisitions) so concurrent flushes
/// of the same visit cannot roll time backwards.
#[async_trait::async_trait]
pub trait VisitStore: Send + Sync + 'static {
    /// Insert `record` unless a record with the same `visit_id` exists.
    /// Returns `true` when a row was inserted.
    async fn create_if_absent(&self, record: &VisitRecord) -> anyhow::Result<bool>;

    /// Set `elapsed_seconds` and `last_synced_at` only if `elapsed_seconds` is
    /// not below the stored value.
    async fn advance_elapsed(
        &self,
        visit_id: &str,
        elapsed_seconds: u64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AdvanceOutcome>;

    /// Close every open visit of `user_key` started at or before `started_before`.
    /// Returns the number of visits closed.
    async fn close_open_visits(
        &self,
        user_key: &str,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    /// Close every open visit whose `last_synced_at` is older than `cutoff`.
    async fn close_abandoned_visits(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    async fn get_visit(&self, visit_id: &str) -> anyhow::Result<Option<VisitRecord>>;

    /// Records matching `filter`, ordered by `started_at`.
    async fn scan_visits(&self, filter: &VisitFilter) -> anyhow::Result<Vec<VisitRecord>>;
}
