/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup (idempotent).
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `PAGETRAIL_DUCKDB_MEMORY`, default `"1GB"`).
///
/// IMPORTANT:
///   - Always set an explicit memory limit. The DuckDB default (80% of
///     system RAM) is not acceptable for a server process.
///   - Only immutable columns are indexed. DuckDB rewrites an UPDATE of an
///     indexed column as delete + insert, which trips the primary key check
///     when the same visit is flushed twice in quick succession.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SETTINGS
-- ===========================================
-- Keys stored in this table:
--   'version'        – Database schema version (for migrations)
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- VISITS (one row per actor, browsing session and route)
-- ===========================================
CREATE TABLE IF NOT EXISTS visits (
    visit_id        VARCHAR PRIMARY KEY,           -- generated client-side (UUID v4)
    user_key        VARCHAR,                       -- NULL for anonymous visits
    route           VARCHAR NOT NULL,              -- canonical allow-listed path
    device          VARCHAR NOT NULL,              -- 'desktop' | 'mobile' | 'tablet' | 'unknown'
    elapsed_seconds BIGINT NOT NULL DEFAULT 0,     -- only ever advanced (compare-and-set)
    started_at      TIMESTAMP NOT NULL,
    last_synced_at  TIMESTAMP NOT NULL,
    closed_at       TIMESTAMP                      -- NULL while the visit is open
);
-- Reconcile: open visits of one user
CREATE INDEX IF NOT EXISTS idx_visits_user
    ON visits(user_key);
-- Observation-window scans
CREATE INDEX IF NOT EXISTS idx_visits_started
    ON visits(started_at);
-- Per-route scans
CREATE INDEX IF NOT EXISTS idx_visits_route_started
    ON visits(route, started_at);
"#
    )
}
