mod bot;
mod config;
mod db;
mod errors;
mod funnel;
mod llm_client;
mod models;
mod routes;
mod state;
mod telegram;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bot::inbound::InboundPipeline;
use crate::config::Config;
use crate::db::create_pool;
use crate::funnel::executor::{LlmComposer, ReactivationExecutor};
use crate::funnel::postgres::PgFunnelStore;
use crate::funnel::scheduler::ReactivationScheduler;
use crate::funnel::scoring::ScoringEngine;
use crate::funnel::store::FunnelStore;
use crate::funnel::worker;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::telegram::{mask_token, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing or malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Funnel API v{}", env!("CARGO_PKG_VERSION"));

    let stage_policy = config.stage_policy()?;
    for band in stage_policy.bands() {
        info!("Stage band {}: {}..={:?}", band.stage, band.min, band.max);
    }
    let reactivation_policy = config.reactivation_policy();

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;
    let store: Arc<dyn FunnelStore> = Arc::new(PgFunnelStore::new(db));

    // Initialize collaborators
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let telegram = TelegramClient::new(config.telegram_bot_token.clone())?;
    info!(
        "Telegram client initialized for bot '{}' (token {})",
        config.telegram_bot_id,
        mask_token(&config.telegram_bot_token)
    );

    let scoring = ScoringEngine::new(store.clone(), stage_policy);
    let scheduler = ReactivationScheduler::new(store.clone(), reactivation_policy);
    let executor = ReactivationExecutor::new(
        store.clone(),
        Arc::new(LlmComposer(llm)),
        Arc::new(telegram),
        chrono::Duration::seconds(config.reactivation_retry_delay_secs),
        config.reactivation_dispatch_limit,
    );
    let inbound = InboundPipeline::new(
        store.clone(),
        scoring.clone(),
        executor.clone(),
        config.telegram_bot_id.clone(),
    );

    // Background driver loops
    let cancel = CancellationToken::new();
    let scan_loop = worker::spawn_scan_loop(
        scheduler.clone(),
        Duration::from_secs(config.reactivation_scan_interval_secs),
        cancel.clone(),
    );
    let dispatch_loop = worker::spawn_dispatch_loop(
        executor.clone(),
        Duration::from_secs(config.reactivation_dispatch_interval_secs),
        cancel.clone(),
    );

    let state = AppState {
        store,
        scoring,
        scheduler,
        executor,
        inbound,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    let (scan, dispatch) = tokio::join!(scan_loop, dispatch_loop);
    for (name, joined) in [("scan", scan), ("dispatch", dispatch)] {
        if let Err(e) = joined {
            tracing::error!("Reactivation {name} loop ended abnormally: {e}");
        }
    }
    info!("Funnel API shutdown complete");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
        // Keep serving until something else cancels.
        cancel.cancelled().await;
        return;
    }
    info!("Shutdown signal received");
    cancel.cancel();
}
