use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::analytics::AggregationConfig;
use crate::routes::RouteAllowList;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    /// DuckDB `memory_limit` size string, e.g. `"1GB"` or `"512MB"`.
    pub duckdb_memory_limit: String,
    pub tracked_routes: RouteAllowList,
    pub session_window_minutes: u32,
    /// Open visits not synced for this long are closed by the sweep loop.
    pub abandon_after_minutes: u32,
    pub sweep_interval_secs: u64,
    pub cors_origins: Vec<String>,
    /// Per-IP requests per minute on the ingestion routes; 0 disables the limit.
    pub rate_limit_per_minute: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            tracked_routes: RouteAllowList::default(),
            session_window_minutes: 30,
            abandon_after_minutes: 30,
            sweep_interval_secs: 60,
            cors_origins: Vec::new(),
            rate_limit_per_minute: 120,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let sweep_interval_secs = parse_var(
            &lookup,
            "PAGETRAIL_SWEEP_INTERVAL_SECS",
            "sweep interval",
            defaults.sweep_interval_secs,
        )?;
        if sweep_interval_secs == 0 {
            return Err("invalid sweep interval: must be greater than zero".to_string());
        }
        Ok(Self {
            port: parse_var(&lookup, "PAGETRAIL_PORT", "port", defaults.port)?,
            data_dir: lookup("PAGETRAIL_DATA_DIR").unwrap_or(defaults.data_dir),
            duckdb_memory_limit: lookup("PAGETRAIL_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            tracked_routes: lookup("PAGETRAIL_TRACKED_ROUTES")
                .map(|v| RouteAllowList::parse(&v))
                .unwrap_or(defaults.tracked_routes),
            session_window_minutes: parse_var(
                &lookup,
                "PAGETRAIL_SESSION_WINDOW_MINUTES",
                "session window",
                defaults.session_window_minutes,
            )?,
            abandon_after_minutes: parse_var(
                &lookup,
                "PAGETRAIL_ABANDON_AFTER_MINUTES",
                "abandon timeout",
                defaults.abandon_after_minutes,
            )?,
            sweep_interval_secs,
            cors_origins: lookup("PAGETRAIL_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_per_minute: parse_var(
                &lookup,
                "PAGETRAIL_RATE_LIMIT_PER_MINUTE",
                "rate limit",
                defaults.rate_limit_per_minute,
            )?,
        })
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            session_window: chrono::Duration::minutes(i64::from(self.session_window_minutes)),
        }
    }

    pub fn abandon_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.abandon_after_minutes))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Unset means `default`; set but unparsable is an error naming `label`.
fn parse_var<T, F>(lookup: &F, key: &str, label: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {label}: {e}")),
        None => Ok(default),
    }
}
