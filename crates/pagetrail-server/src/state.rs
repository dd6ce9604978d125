use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use pagetrail_core::config::Config;
use pagetrail_core::ingest::IngestionService;
use pagetrail_core::store::VisitStore;
use pagetrail_duckdb::DuckDbBackend;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend, also held by `ingest` as its [`VisitStore`].
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub ingest: IngestionService,

    /// Per-IP sliding-window rate limiter for the `/api/visits/*` routes.
    ///
    /// Key: IP address string. Value: request timestamps within the last
    /// 60 seconds.
    rate_limiter: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let store: Arc<dyn VisitStore> = db.clone();
        let ingest = IngestionService::new(
            store,
            config.tracked_routes.clone(),
            config.aggregation(),
        );
        Self {
            db,
            config: Arc::new(config),
            ingest,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `ip` is within `config.rate_limit_per_minute`.
    ///
    /// Returns `true` if the request should proceed, `false` if it should be
    /// rejected with 429. A limit of 0 admits everything.
    pub async fn check_rate_limit(&self, ip: &str) -> bool {
        let limit = self.config.rate_limit_per_minute as usize;
        if limit == 0 {
            return true;
        }
        let now = Instant::now();
        let mut map = self.rate_limiter.lock().await;
        let window = map.entry(ip.to_string()).or_default();
        drop_expired(window, now);
        if window.len() >= limit {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Forget clients with no request inside the window ending at `now`.
    pub async fn prune_rate_limiter_at(&self, now: Instant) -> usize {
        let mut map = self.rate_limiter.lock().await;
        let before = map.len();
        map.retain(|_, window| {
            drop_expired(window, now);
            !window.is_empty()
        });
        before - map.len()
    }

    /// Number of clients currently held by the rate limiter.
    pub async fn rate_limited_clients(&self) -> usize {
        self.rate_limiter.lock().await.len()
    }

    /// Close visits whose tracker stopped syncing without a final flush.
    pub async fn sweep_abandoned_visits(&self) -> anyhow::Result<u64> {
        self.ingest
            .sweep_abandoned(self.config.abandon_after(), Utc::now())
            .await
    }

    /// Background loop: run the abandoned-visit sweep and prune idle
    /// rate-limiter entries on a fixed interval.
    ///
    /// Spawned as a `tokio::spawn` task in `main.rs`. A failed sweep is logged
    /// and retried on the next tick.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        loop {
            ticker.tick().await;
            match self.sweep_abandoned_visits().await {
                Ok(closed) => debug!(closed, "Abandoned-visit sweep finished"),
                Err(e) => error!(error = %e, "Abandoned-visit sweep failed"),
            }
            let forgotten = self.prune_rate_limiter_at(Instant::now()).await;
            if forgotten > 0 {
                debug!(forgotten, "Rate limiter pruned idle clients");
            }
        }
    }
}

fn drop_expired(window: &mut VecDeque<Instant>, now: Instant) {
    while window
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= RATE_LIMIT_WINDOW)
    {
        window.pop_front();
    }
}
