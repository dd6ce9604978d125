use anyhow::Result;

use pagetrail_core::store::VisitFilter;
use pagetrail_core::visit::{Device, VisitRecord};

use crate::backend::{format_ts, parse_ts};
use crate::DuckDbBackend;

const VISIT_COLUMNS: &str = "visit_id, user_key, route, device, elapsed_seconds, \
     CAST(started_at AS VARCHAR), CAST(last_synced_at AS VARCHAR), CAST(closed_at AS VARCHAR)";

/// Row as read from DuckDB, before timestamp parsing.
struct VisitRow {
    visit_id: String,
    user_key: Option<String>,
    route: String,
    device: String,
    elapsed_seconds: i64,
    started_at: String,
    last_synced_at: String,
    closed_at: Option<String>,
}

impl VisitRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            visit_id: row.get(0)?,
            user_key: row.get(1)?,
            route: row.get(2)?,
            device: row.get(3)?,
            elapsed_seconds: row.get(4)?,
            started_at: row.get(5)?,
            last_synced_at: row.get(6)?,
            closed_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<VisitRecord> {
        Ok(VisitRecord {
            visit_id: self.visit_id,
            user_key: self.user_key,
            route: self.route,
            device: self.device.parse().unwrap_or(Device::Unknown),
            elapsed_seconds: u64::try_from(self.elapsed_seconds).unwrap_or(0),
            started_at: parse_ts(&self.started_at)?,
            last_synced_at: parse_ts(&self.last_synced_at)?,
            closed_at: self.closed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn append_visit_filters(
    filter: &VisitFilter,
    filter_sql: &mut String,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) {
    if let Some(since) = filter.since {
        filter_sql.push_str(&format!(" AND started_at >= CAST(?{} AS TIMESTAMP)", *param_idx));
        params.push(Box::new(format_ts(since)));
        *param_idx += 1;
    }
    if let Some(until) = filter.until {
        filter_sql.push_str(&format!(" AND started_at < CAST(?{} AS TIMESTAMP)", *param_idx));
        params.push(Box::new(format_ts(until)));
        *param_idx += 1;
    }
    if let Some(ref route) = filter.route {
        filter_sql.push_str(&format!(" AND route = ?{}", *param_idx));
        params.push(Box::new(route.clone()));
        *param_idx += 1;
    }
    if let Some(ref user_key) = filter.user_key {
        filter_sql.push_str(&format!(" AND user_key = ?{}", *param_idx));
        params.push(Box::new(user_key.clone()));
        *param_idx += 1;
    }
    if filter.open_only {
        filter_sql.push_str(" AND closed_at IS NULL");
    }
}

pub(crate) async fn scan_visits_inner(
    db: &DuckDbBackend,
    filter: &VisitFilter,
) -> Result<Vec<VisitRecord>> {
    let conn = db.conn.lock().await;

    // Boxed `ToSql` params are not `Send`; build them after the await.
    let mut filter_sql = String::new();
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
    let mut param_idx = 1;
    append_visit_filters(filter, &mut filter_sql, &mut params, &mut param_idx);

    let sql = format!(
        "SELECT {VISIT_COLUMNS} FROM visits WHERE 1 = 1{filter_sql} \
         ORDER BY started_at ASC, visit_id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), VisitRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;

    rows.into_iter().map(VisitRow::into_record).collect()
}

pub(crate) async fn get_visit_inner(
    db: &DuckDbBackend,
    visit_id: &str,
) -> Result<Option<VisitRecord>> {
    let row = {
        let conn = db.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE visit_id = ?1"
        ))?;
        let mut rows = stmt.query_map(duckdb::params![visit_id], VisitRow::from_row)?;
        let first = rows.next().transpose()?;
        first
    };

    row.map(VisitRow::into_record).transpose()
}
