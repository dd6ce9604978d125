use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pagetrail_core::store::{AdvanceOutcome, VisitFilter, VisitStore};
use pagetrail_core::visit::VisitRecord;

use crate::DuckDbBackend;

#[async_trait]
impl VisitStore for DuckDbBackend {
    async fn create_if_absent(&self, record: &VisitRecord) -> anyhow::Result<bool> {
        crate::visits::create_if_absent_inner(self, record).await
    }

    async fn advance_elapsed(
        &self,
        visit_id: &str,
        elapsed_seconds: u64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AdvanceOutcome> {
        crate::visits::advance_elapsed_inner(self, visit_id, elapsed_seconds, now).await
    }

    async fn close_open_visits(
        &self,
        user_key: &str,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        crate::visits::close_open_visits_inner(self, user_key, started_before, now).await
    }

    async fn close_abandoned_visits(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        crate::visits::close_abandoned_visits_inner(self, cutoff, now).await
    }

    async fn get_visit(&self, visit_id: &str) -> anyhow::Result<Option<VisitRecord>> {
        crate::queries::scan::get_visit_inner(self, visit_id).await
    }

    async fn scan_visits(&self, filter: &VisitFilter) -> anyhow::Result<Vec<VisitRecord>> {
        crate::queries::scan::scan_visits_inner(self, filter).await
    }
}
