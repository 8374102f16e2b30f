//! CiteForge context service
//!
//! Wires the retrieval engine to PostgreSQL (full-text + pgvector), the
//! query embedder and the conversation store, and serves it over HTTP.

use anyhow::Context;
use citeforge_common::{
    cache::{Cache, CacheConfig},
    config::{AppConfig, ObservabilityConfig},
    conversation::{ConversationStore, InMemoryConversationStore, RedisConversationStore},
    db::DbPool,
    embeddings::create_embedder,
    metrics, CancellationToken, RetrievalStats, VERSION,
};
use citeforge_context::{create_generator, create_router, AppState, RetrievalEngine};
use citeforge_search::{FusionSearcher, PgLexicalIndex, PgVectorIndex};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);
    config.validate()?;

    info!("Starting CiteForge context service v{}", VERSION);

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        metrics::register_metrics();
        info!(%addr, "Metrics exporter listening");
    }

    let database = config
        .database
        .as_ref()
        .context("database configuration is required to run the service")?;
    info!("Connecting to database...");
    let db = Arc::new(DbPool::new(database).await?);

    let embedder = create_embedder(&config.embedding)?;
    let searcher = FusionSearcher::new(
        Arc::new(PgLexicalIndex::new(db.clone())),
        Arc::new(PgVectorIndex::new(db.clone(), embedder)),
        config.retrieval.clone(),
    );

    let (store, cache): (Arc<dyn ConversationStore>, Option<Arc<Cache>>) =
        match CacheConfig::from_redis(&config.redis) {
            Some(cache_config) => {
                info!("Connecting to Redis...");
                let cache = Arc::new(Cache::new(cache_config).await?);
                let store = RedisConversationStore::new(cache.clone(), config.carry_over.state_ttl_secs);
                (Arc::new(store), Some(cache))
            }
            None => {
                warn!("No Redis URL configured, conversation state is kept in memory");
                let store = InMemoryConversationStore::with_ttl(config.carry_over.state_ttl_secs);
                (Arc::new(store), None)
            }
        };

    let stats = Arc::new(RetrievalStats::new());
    let mut engine = RetrievalEngine::new(&config, searcher, store, stats);
    if let Some(generator) = create_generator(&config.generation)? {
        info!(generator = generator.name(), "Generation collaborator enabled");
        engine = engine.with_generator(generator);
    }

    let mut state = AppState::new(Arc::new(engine))
        .with_db(db)
        .with_default_deadline(config.request_timeout());
    if let Some(cache) = cache {
        state = state.with_cache(cache);
    }
    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
