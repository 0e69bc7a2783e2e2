//! Messaging System Server
//!
//! Runs the dispatch processor together with its HTTP control API.
//!
//! ## Endpoints
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /processor/start` | Start periodic dispatching |
//! | `POST /processor/stop` | Stop periodic dispatching |
//! | `GET /processor/status` | Current processor state |
//! | `GET /processor/sent-messages?limit=N` | Sent messages (default 10) |
//! | `GET /health`, `/health/live`, `/health/ready` | Health and probes |
//! | `GET /metrics` | Prometheus metrics |
//! | `GET /swagger-ui` | API documentation |
//!
//! Configuration comes from TOML (see `--print-config`) with
//! `MESSAGING_<SECTION>_<KEY>` environment overrides. `RUST_LOG` and
//! `LOG_FORMAT` control logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ms_common::logging::init_logging;
use ms_config::{AppConfig, ConfigLoader};
use ms_processor::api::create_router;
use ms_processor::{
    DeliveryCache, DispatchPipeline, InMemoryDeliveryCache, InMemoryMessageRepository,
    MessageProcessor, MessageRepository, MongoMessageRepository, PipelineConfig, ProcessorConfig,
    RedisDeliveryCache, WebhookClient, WebhookConfig,
};

/// Time allowed for an in-flight dispatch pass to finish on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "ms-server")]
#[command(about = "Messaging System - scheduled webhook dispatch with an HTTP control API")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, env = "MESSAGING_CONFIG")]
    config: Option<String>,

    /// Use the in-memory store and cache instead of MongoDB and Redis
    #[arg(long)]
    dev: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    init_logging("ms-server");

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if args.dev {
        config.dev_mode = true;
    }

    info!(
        app = %config.app_name,
        dev_mode = config.dev_mode,
        poll_interval_secs = config.processor.poll_interval_secs,
        batch_size = config.processor.batch_size,
        "Starting Messaging System"
    );

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let repository = create_repository(&config).await?;
    let cache = create_cache(&config).await?;
    let delivery = Arc::new(WebhookClient::new(WebhookConfig {
        url: config.webhook.url.clone(),
        api_key: config.webhook.api_key.clone(),
        connect_timeout: Duration::from_secs(config.webhook.connect_timeout_secs),
        request_timeout: Duration::from_secs(config.webhook.request_timeout_secs),
    })?);

    let pipeline = DispatchPipeline::new(
        repository,
        delivery,
        cache,
        PipelineConfig {
            batch_size: config.processor.batch_size,
            cache_ttl: config.redis.ttl(),
            call_timeout: config.processor.call_timeout(),
        },
    );
    let processor = Arc::new(MessageProcessor::new(
        Arc::new(pipeline),
        ProcessorConfig {
            poll_interval: config.processor.poll_interval(),
        },
    ));

    if config.processor.auto_start {
        processor.start();
    }

    let app = create_router(processor.clone())
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down processor...");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, processor.shutdown()).await.is_err() {
        warn!("Processor did not finish its pass within {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Messaging System shutdown complete");
    Ok(())
}

async fn create_repository(config: &AppConfig) -> Result<Arc<dyn MessageRepository>> {
    if config.dev_mode {
        info!("Using in-memory message store");
        return Ok(Arc::new(InMemoryMessageRepository::new()));
    }

    let client = mongodb::Client::with_uri_str(&config.mongodb.uri).await?;
    let repo = MongoMessageRepository::new(
        client,
        &config.mongodb.database,
        &config.mongodb.message_collection,
    );
    repo.init_schema().await?;
    info!(
        database = %config.mongodb.database,
        collection = %config.mongodb.message_collection,
        "Using MongoDB message store"
    );
    Ok(Arc::new(repo))
}

async fn create_cache(config: &AppConfig) -> Result<Arc<dyn DeliveryCache>> {
    if config.dev_mode {
        info!("Using in-memory delivery cache");
        return Ok(Arc::new(InMemoryDeliveryCache::new()));
    }

    let cache = RedisDeliveryCache::connect(&config.redis.url).await?;
    Ok(Arc::new(cache))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
