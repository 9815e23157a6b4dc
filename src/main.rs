//! ==============================================================================
//! main.rs - sensor feed entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the polling core to the outside world: reads `feed.toml`,
//!     builds the http transport, starts the dashboard feed and keeps it
//!     fresh, and serves its snapshot as json for the display layer.
//!
//! responsibilities:
//!     - install structured logging (RUST_LOG wins over logging.level)
//!     - start the feed (every cache refreshed once)
//!     - poll loop: refresh_all() every polling.interval_seconds
//!     - web server: GET /api, POST /api/refresh, POST /api/refresh/:kind
//!
//! architecture:
//!
//!     ┌───────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                  │
//!     │  ┌─────────────┐  ┌──────────────────────┐                │
//!     │  │ poll loop   │  │ web server           │                │
//!     │  │ (30s cycle) │  │ (port 3000)          │                │
//!     │  └──────┬──────┘  └──────────┬───────────┘                │
//!     │         └────────────┬───────┘                            │
//!     │               ┌──────┴───────┐                            │
//!     │               │ DashboardFeed│ <- feed.rs                 │
//!     │               └──────┬───────┘                            │
//!     │        one PollingCache per sensor / log metric           │
//!     └──────────────────────┼────────────────────────────────────┘
//!                            │ GET <base>/<endpoint>/<hours>
//!                     ┌──────┴──────┐
//!                     │  telemetry  │
//!                     │   backend   │
//!                     └─────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use sensor_feed::{DashboardFeed, FeedConfig, FetchState, HttpTransport, SensorKind};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration (bootstrap subscriber so loader warnings show)
    let bootstrap = tracing_subscriber::fmt().finish();
    let config = tracing::subscriber::with_default(bootstrap, FeedConfig::load_or_default);

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("===========================================================");
    info!("  Sensor Feed v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");
    config.print_summary();

    // step 3: transport + feed (initial refresh of every cache happens here)
    let transport = HttpTransport::new(&config.transport.base_url, config.timeout())
        .context("failed to create http transport")?;
    let feed = Arc::new(DashboardFeed::start(
        Arc::new(transport),
        &config.feed_options(),
    ));

    // step 4: start the web server in background
    if config.server.enabled {
        let web_feed = Arc::clone(&feed);
        let bind = config.server.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(web_feed, &bind).await {
                error!("Web server error: {:#}", e);
            }
        });
    }

    // step 5: polling loop
    let show_data = config.logging.show_sensor_data;
    if show_data {
        log_readings(&feed).await;
    }

    match config.poll_interval() {
        Some(interval) => {
            info!("Starting sensor polling ({}s interval)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(interval) => {
                        let started = feed.refresh_all();
                        info!(started, "poll cycle");
                        if show_data {
                            log_readings(&feed).await;
                        }
                    }
                }
            }
        }
        None => {
            info!("Periodic polling disabled, refreshing on request only");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn log_readings(feed: &DashboardFeed) {
    let snapshot = feed.settled().await;
    for (kind, state) in &snapshot.readings {
        match state {
            FetchState::Ready { value, .. } => {
                info!("[{}] {}: {} ({})", kind, value.name, value.value, value.icon_kind().as_str())
            }
            FetchState::Failed { error, attempts } => {
                info!("[{}] unavailable after {} attempts: {}", kind, attempts, error)
            }
            FetchState::Idle | FetchState::Loading => {}
        }
    }
    for series in snapshot.chart.iter() {
        info!("[chart] {}: {} points", series.name, series.points.len());
    }
}

// ==============================================================================
// web server
// ==============================================================================

async fn run_server(feed: Arc<DashboardFeed>, bind: &str) -> Result<()> {
    let app = Router::new()
        .route("/api", get(api_handler))
        .route("/api/refresh", post(refresh_all_handler))
        .route("/api/refresh/:kind", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(feed);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Snapshot live at http://{}/api", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

/// json snapshot of every cache for the display layer
async fn api_handler(State(feed): State<Arc<DashboardFeed>>) -> Json<sensor_feed::FeedSnapshot> {
    Json(feed.snapshot())
}

/// POST /api/refresh
async fn refresh_all_handler(State(feed): State<Arc<DashboardFeed>>) -> Json<serde_json::Value> {
    let started = feed.refresh_all();
    Json(serde_json::json!({"status": "ok", "started": started}))
}

/// POST /api/refresh/:kind
async fn refresh_handler(
    State(feed): State<Arc<DashboardFeed>>,
    Path(kind): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(kind) = SensorKind::parse(&kind) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"status": "error", "message": "unknown sensor"})),
        ));
    };
    let started = feed.refresh(kind);
    Ok(Json(serde_json::json!({"status": "ok", "sensor": kind, "started": started})))
}
