use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pagetrail_server::state::AppState;

/// `pagetrail health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$PAGETRAIL_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("PAGETRAIL_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pagetrail=info".parse()?),
        )
        .json()
        .init();

    let cfg = pagetrail_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/pagetrail.db", cfg.data_dir);

    // Open DuckDB — initialises schema and seeds settings table.
    let db = pagetrail_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    info!(
        tracked_routes = cfg.tracked_routes.len(),
        session_window_minutes = cfg.session_window_minutes,
        "Route allow-list loaded"
    );

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // Spawn background abandoned-visit sweep.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_sweep_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = pagetrail_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "pagetrail listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Peer addresses key the ingestion rate limiter when no proxy sets
    // X-Forwarded-For.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    info!("pagetrail shut down");
    Ok(())
}
