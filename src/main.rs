//! Betting-exchange odds ingestion and query service.
//!
//! Pulls encrypted tree/odds feeds from the upstream provider, normalizes
//! them into one canonical schema, keeps the sport/competition/event
//! hierarchy in Postgres (insert-only), caches canonical odds documents in
//! Redis, and serves the cached data over a small read API.

mod api;
mod cache;
mod config;
mod crypto;
mod db;
mod error;
mod feed;
mod json;
mod normalize;
mod query;
mod reconcile;
mod scheduler;
mod tree;
mod types;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::api::{router, ApiState};
use crate::cache::RedisCache;
use crate::config::Config;
use crate::feed::FeedClient;
use crate::scheduler::IngestionService;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exchange_odds=info".parse().unwrap()),
        )
        .init();

    info!("Exchange odds service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let api_port = config.api_port;
    let run_once = config.run_once;

    let pool = db::connect_with_retry(&config.database_url, 5).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let cache = Arc::new(RedisCache::connect_with_retry(&config.redis_url, 5).await?);
    let feed = Arc::new(FeedClient::new(&config)?);

    let service = Arc::new(IngestionService::new(
        config,
        pool.clone(),
        cache.clone(),
        feed.clone(),
    ));

    // One-shot mode: a single tree sync + odds cycle, then exit.
    if run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        let summary = service.sync_tree_once().await?;
        info!(
            "Tree sync: +{} sports, +{} competitions, +{} events",
            summary.sports_created, summary.competitions_created, summary.events_created,
        );
        let report = Arc::clone(&service).reconcile_all_events().await?;
        info!(
            "Odds cycle: {} events, {} stored, {} empty, {} failed",
            report.total,
            report.stored,
            report.empty,
            report.failed_count(),
        );
        return Ok(());
    }

    let state = ApiState {
        pool,
        cache,
        feed,
        health: service.health.clone(),
    };
    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {e}");
        }
    });

    let ingest = Arc::clone(&service);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = ingest.run() => {}
        _ = server => {}
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
