//! Ingestion and query operations over a [`VisitStore`].
//!
//! Every ingestion operation is idempotent and reports `IngestAck { ok }`
//! instead of an error: a rejected or failed call degrades metric accuracy,
//! never the product surface that made it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::aggregate::compute_deep_analytics;
use crate::analytics::{AggregateMetrics, AggregationConfig, ObservationWindow};
use crate::error::CoreError;
use crate::routes::RouteAllowList;
use crate::store::{AdvanceOutcome, VisitFilter, VisitStore};
use crate::visit::{
    BeginVisitRequest, IngestAck, ReconcileVisitsRequest, UpdateVisitRequest, VisitRecord,
};

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn VisitStore>,
    routes: RouteAllowList,
    aggregation: AggregationConfig,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn VisitStore>,
        routes: RouteAllowList,
        aggregation: AggregationConfig,
    ) -> Self {
        Self {
            store,
            routes,
            aggregation,
        }
    }

    pub fn routes(&self) -> &RouteAllowList {
        &self.routes
    }

    pub fn store(&self) -> &Arc<dyn VisitStore> {
        &self.store
    }

    /// Validate a begin-visit request and build the record it would create.
    pub fn prepare_visit(
        &self,
        req: &BeginVisitRequest,
        now: DateTime<Utc>,
    ) -> Result<VisitRecord, CoreError> {
        if req.visit_id.trim().is_empty() {
            return Err(CoreError::EmptyVisitId);
        }
        let route = self
            .routes
            .resolve(&req.route)
            .ok_or_else(|| CoreError::UntrackedRoute(req.route.clone()))?;
        Ok(VisitRecord::new(
            req.visit_id.clone(),
            req.user_key.clone(),
            route,
            req.device,
            now,
        ))
    }

    pub async fn begin_visit(&self, req: &BeginVisitRequest) -> IngestAck {
        self.begin_visit_at(req, Utc::now()).await
    }

    /// Create the visit if absent. A repeated `visit_id` is acknowledged
    /// without overwriting the stored record.
    pub async fn begin_visit_at(&self, req: &BeginVisitRequest, now: DateTime<Utc>) -> IngestAck {
        let record = match self.prepare_visit(req, now) {
            Ok(record) => record,
            Err(e) => {
                debug!(visit_id = %req.visit_id, route = %req.route, error = %e, "begin-visit rejected");
                return IngestAck::REJECTED;
            }
        };

        match self.store.create_if_absent(&record).await {
            Ok(true) => IngestAck::OK,
            Ok(false) => {
                debug!(visit_id = %record.visit_id, "begin-visit for existing visit_id ignored");
                IngestAck::OK
            }
            Err(e) => {
                warn!(visit_id = %record.visit_id, error = %e, "begin-visit store write failed");
                IngestAck::REJECTED
            }
        }
    }

    pub async fn update_visit(&self, req: &UpdateVisitRequest) -> IngestAck {
        self.update_visit_at(req, Utc::now()).await
    }

    /// Advance the elapsed time. A value below the stored one is a delayed or
    /// duplicated flush and is acknowledged without writing.
    pub async fn update_visit_at(&self, req: &UpdateVisitRequest, now: DateTime<Utc>) -> IngestAck {
        match self
            .store
            .advance_elapsed(&req.visit_id, req.elapsed_seconds, now)
            .await
        {
            Ok(AdvanceOutcome::Advanced) => IngestAck::OK,
            Ok(AdvanceOutcome::Stale) => {
                debug!(
                    visit_id = %req.visit_id,
                    elapsed_seconds = req.elapsed_seconds,
                    "stale update-visit ignored"
                );
                IngestAck::OK
            }
            Ok(AdvanceOutcome::Unknown) => {
                debug!(visit_id = %req.visit_id, "update-visit for unknown visit_id");
                IngestAck::REJECTED
            }
            Err(e) => {
                warn!(visit_id = %req.visit_id, error = %e, "update-visit store write failed");
                IngestAck::REJECTED
            }
        }
    }

    pub async fn reconcile_stale_visits(&self, req: &ReconcileVisitsRequest) -> IngestAck {
        self.reconcile_stale_visits_at(req, Utc::now()).await
    }

    /// Close every visit of the user still open at `now`. Anonymous callers
    /// have no owner to reconcile against; the abandoned-visit sweep handles
    /// their orphans.
    pub async fn reconcile_stale_visits_at(
        &self,
        req: &ReconcileVisitsRequest,
        now: DateTime<Utc>,
    ) -> IngestAck {
        let Some(user_key) = req.user_key.as_deref() else {
            return IngestAck::OK;
        };
        match self.store.close_open_visits(user_key, now, now).await {
            Ok(closed) => {
                if closed > 0 {
                    debug!(closed, "reconciled stale visits");
                }
                IngestAck::OK
            }
            Err(e) => {
                warn!(error = %e, "reconcile-stale-visits failed");
                IngestAck::REJECTED
            }
        }
    }

    /// Close open visits not synced within `abandon_after` of `now`.
    pub async fn sweep_abandoned(
        &self,
        abandon_after: chrono::Duration,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.store
            .close_abandoned_visits(now - abandon_after, now)
            .await
    }

    pub async fn get_deep_analytics(&self) -> anyhow::Result<AggregateMetrics> {
        self.get_deep_analytics_in(&ObservationWindow::default()).await
    }

    /// Aggregate the visits started inside `window`.
    pub async fn get_deep_analytics_in(
        &self,
        window: &ObservationWindow,
    ) -> anyhow::Result<AggregateMetrics> {
        let filter = VisitFilter {
            since: window.since,
            until: window.until,
            ..Default::default()
        };
        let records = self.store.scan_visits(&filter).await?;
        Ok(compute_deep_analytics(
            &records,
            &self.routes,
            &self.aggregation,
            Utc::now(),
        ))
    }
}
