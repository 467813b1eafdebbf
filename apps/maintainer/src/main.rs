mod batch;
mod catalog;
mod config;
mod content;
mod errors;
mod ledger;
mod llm_client;
mod models;
mod net;
mod progress;
mod publisher;
mod queue;
mod routes;
mod scheduler;
mod search;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::content::staleness::StalenessConfig;
use crate::ledger::store::RedisStore;
use crate::ledger::{Ledger, LedgerPolicy};
use crate::llm_client::cache::{CachePolicy, CachedGenerator};
use crate::llm_client::{Generator, LlmClient};
use crate::net::gate::{CooldownGate, GatePolicy};
use crate::net::HttpFetcher;
use crate::progress::ProgressFeed;
use crate::publisher::wp::WpClient;
use crate::publisher::Publisher;
use crate::routes::build_router;
use crate::scheduler::pipeline::PagePipeline;
use crate::scheduler::{Scheduler, SchedulerTimings};
use crate::search::{SearchProvider, SerperSearch};
use crate::state::AppState;

/// Ledger keys live under `maintainer:<key>` in redis.
const LEDGER_NAMESPACE: &str = "maintainer";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting maintainer v{}", env!("CARGO_PKG_VERSION"));

    // Idempotency ledger on Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let ledger = Ledger::new(
        Arc::new(RedisStore::new(redis, LEDGER_NAMESPACE)),
        LedgerPolicy::default(),
    );
    info!("Ledger initialized (redis namespace: {LEDGER_NAMESPACE})");

    // Content backend behind the shared cooldown gate
    let timeout = Duration::from_secs(config.http_timeout_secs);
    let gate = Arc::new(CooldownGate::new(GatePolicy::default()));
    let fetcher = Arc::new(HttpFetcher::new(
        timeout,
        config.proxy_url.as_deref(),
        Some(gate),
    )?);
    let backend = Arc::new(WpClient::new(
        &config.wp_base_url,
        &config.wp_username,
        &config.wp_app_password,
        fetcher,
    ));
    info!(
        "Content backend: {} (proxy fallback: {})",
        config.wp_base_url,
        config.proxy_url.is_some()
    );

    // Generation capability (optional; the scheduler refuses to start without it)
    let generator: Option<Arc<dyn Generator>> = match &config.anthropic_api_key {
        Some(key) => {
            let llm = LlmClient::new(key.clone(), Duration::from_secs(config.llm_timeout_secs))?;
            info!("LLM client initialized (model: {})", llm_client::MODEL);
            Some(Arc::new(CachedGenerator::new(
                Arc::new(llm),
                CachePolicy::default(),
            )))
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; generation is disabled");
            None
        }
    };

    // Search / link verification (optional; references are skipped without it)
    let search: Option<Arc<dyn SearchProvider>> = match &config.search_api_key {
        Some(key) => Some(Arc::new(SerperSearch::new(key.clone(), timeout)?)),
        None => {
            warn!("SEARCH_API_KEY not set; verified references are disabled");
            None
        }
    };

    let progress = Arc::new(ProgressFeed::new());
    let pipeline = PagePipeline::new(
        ledger,
        Publisher::new(backend, progress.clone()),
        generator,
        search,
        progress,
        StalenessConfig::for_year(config.target_year),
        config.site_url(),
    );
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(pipeline),
        SchedulerTimings::default(),
    ));

    let state = AppState {
        scheduler: scheduler.clone(),
        config: config.clone(),
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C; asks the scheduler to stop after its current page.
async fn shutdown_signal(scheduler: Arc<Scheduler>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    scheduler.stop();
}
