//! Visit write path: create, compare-and-set advance, close.

use anyhow::Result;
use chrono::{DateTime, Utc};

use pagetrail_core::store::AdvanceOutcome;
use pagetrail_core::visit::VisitRecord;

use crate::backend::{format_ts, to_db_seconds};
use crate::DuckDbBackend;

/// Insert a visit unless its `visit_id` is already stored.
pub(crate) async fn create_if_absent_inner(db: &DuckDbBackend, record: &VisitRecord) -> Result<bool> {
    let conn = db.conn.lock().await;
    let inserted = conn.execute(
        "INSERT INTO visits (visit_id, user_key, route, device, elapsed_seconds, started_at, last_synced_at, closed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, CAST(?6 AS TIMESTAMP), CAST(?7 AS TIMESTAMP), NULL) \
         ON CONFLICT (visit_id) DO NOTHING",
        duckdb::params![
            record.visit_id,
            record.user_key,
            record.route,
            record.device.as_str(),
            to_db_seconds(record.elapsed_seconds),
            format_ts(record.started_at),
            format_ts(record.last_synced_at),
        ],
    )?;
    Ok(inserted > 0)
}

/// Advance `elapsed_seconds` only when the new value is not smaller.
///
/// The conditional `UPDATE` and the follow-up existence check run under one
/// connection lock, so a concurrent flush cannot interleave between them.
pub(crate) async fn advance_elapsed_inner(
    db: &DuckDbBackend,
    visit_id: &str,
    elapsed_seconds: u64,
    now: DateTime<Utc>,
) -> Result<AdvanceOutcome> {
    let conn = db.conn.lock().await;
    let elapsed = to_db_seconds(elapsed_seconds);
    let updated = conn.execute(
        "UPDATE visits \
         SET elapsed_seconds = ?2, last_synced_at = CAST(?3 AS TIMESTAMP) \
         WHERE visit_id = ?1 AND elapsed_seconds <= ?2",
        duckdb::params![visit_id, elapsed, format_ts(now)],
    )?;
    if updated > 0 {
        return Ok(AdvanceOutcome::Advanced);
    }

    let exists: i64 = conn
        .prepare("SELECT COUNT(*) FROM visits WHERE visit_id = ?1")?
        .query_row(duckdb::params![visit_id], |row| row.get(0))?;
    if exists > 0 {
        Ok(AdvanceOutcome::Stale)
    } else {
        Ok(AdvanceOutcome::Unknown)
    }
}

pub(crate) async fn close_open_visits_inner(
    db: &DuckDbBackend,
    user_key: &str,
    started_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let conn = db.conn.lock().await;
    let closed = conn.execute(
        "UPDATE visits SET closed_at = CAST(?3 AS TIMESTAMP) \
         WHERE user_key = ?1 AND closed_at IS NULL AND started_at <= CAST(?2 AS TIMESTAMP)",
        duckdb::params![user_key, format_ts(started_before), format_ts(now)],
    )?;
    Ok(closed as u64)
}

pub(crate) async fn close_abandoned_visits_inner(
    db: &DuckDbBackend,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let conn = db.conn.lock().await;
    let closed = conn.execute(
        "UPDATE visits SET closed_at = CAST(?2 AS TIMESTAMP) \
         WHERE closed_at IS NULL AND last_synced_at < CAST(?1 AS TIMESTAMP)",
        duckdb::params![format_ts(cutoff), format_ts(now)],
    )?;
    if closed > 0 {
        tracing::info!(closed, "Closed abandoned visits");
    }
    Ok(closed as u64)
}
