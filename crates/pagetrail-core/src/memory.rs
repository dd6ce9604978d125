use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::store::{AdvanceOutcome, VisitFilter, VisitStore};
use crate::visit::VisitRecord;

/// Process-local [`VisitStore`] for tests and embedded use.
///
/// A single mutex guards the map; every trait method is one critical section,
/// which gives `advance_elapsed` its compare-and-set semantics.
#[derive(Debug, Default)]
pub struct InMemoryVisitStore {
    visits: Mutex<HashMap<String, VisitRecord>>,
}

impl InMemoryVisitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VisitRecord>>, CoreError> {
        self.visits.lock().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|visits| visits.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VisitStore for InMemoryVisitStore {
    async fn create_if_absent(&self, record: &VisitRecord) -> anyhow::Result<bool> {
        let mut visits = self.lock()?;
        if visits.contains_key(&record.visit_id) {
            return Ok(false);
        }
        visits.insert(record.visit_id.clone(), record.clone());
        Ok(true)
    }

    async fn advance_elapsed(
        &self,
        visit_id: &str,
        elapsed_seconds: u64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AdvanceOutcome> {
        let mut visits = self.lock()?;
        let Some(record) = visits.get_mut(visit_id) else {
            return Ok(AdvanceOutcome::Unknown);
        };
        if elapsed_seconds < record.elapsed_seconds {
            return Ok(AdvanceOutcome::Stale);
        }
        record.elapsed_seconds = elapsed_seconds;
        record.last_synced_at = now;
        Ok(AdvanceOutcome::Advanced)
    }

    async fn close_open_visits(
        &self,
        user_key: &str,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let mut visits = self.lock()?;
        let mut closed = 0;
        for record in visits.values_mut() {
            if record.is_open()
                && record.user_key.as_deref() == Some(user_key)
                && record.started_at <= started_before
            {
                record.closed_at = Some(now);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn close_abandoned_visits(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let mut visits = self.lock()?;
        let mut closed = 0;
        for record in visits.values_mut() {
            if record.is_open() && record.last_synced_at < cutoff {
                record.closed_at = Some(now);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn get_visit(&self, visit_id: &str) -> anyhow::Result<Option<VisitRecord>> {
        Ok(self.lock()?.get(visit_id).cloned())
    }

    async fn scan_visits(&self, filter: &VisitFilter) -> anyhow::Result<Vec<VisitRecord>> {
        let visits = self.lock()?;
        let mut rows: Vec<VisitRecord> = visits
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.visit_id.cmp(&b.visit_id))
        });
        Ok(rows)
    }
}
