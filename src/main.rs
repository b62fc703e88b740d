use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use screenshot_cache::blocking::{BlockListCache, BlockListSources, RuleCompiler};
use screenshot_cache::config::Config;
use screenshot_cache::db::{pool_size_for, Database};
use screenshot_cache::origin::{AllowAllOrigins, HostAllowList, OriginPolicy};
use screenshot_cache::renderer::{ChromiumEngine, EngineConfig, RenderScheduler, ScreenshotService};
use screenshot_cache::s3::S3Client;
use screenshot_cache::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting screenshot-cache");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        concurrency = config.render_concurrency,
        navigation_timeout_secs = config.navigation_timeout.as_secs(),
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::connect(&config.database_path, pool_size_for(config.render_concurrency))
        .await
        .context("Failed to initialize database")?;

    let s3_client = S3Client::new(&config).context("Failed to initialize S3 client")?;
    info!(bucket = %s3_client.bucket_name(), "Object storage ready");

    let origins: Arc<dyn OriginPolicy> = if config.allowed_origins.is_empty() {
        info!("No origin allow-list configured, all origins permitted");
        Arc::new(AllowAllOrigins)
    } else {
        info!(hosts = config.allowed_origins.len(), "Origin allow-list enabled");
        Arc::new(HostAllowList::new(&config.allowed_origins))
    };

    let blocklists = BlockListCache::new(config.blocklist_cache_ttl)
        .context("Failed to initialize block-list cache")?;
    let compiler = RuleCompiler::new(Arc::new(blocklists), BlockListSources::default());

    let engine = ChromiumEngine::new(EngineConfig::from_config(&config));
    let scheduler = RenderScheduler::new(config.render_concurrency);

    let service = ScreenshotService::new(
        db,
        Arc::new(s3_client),
        origins,
        compiler,
        Arc::new(engine),
        scheduler.clone(),
    );

    let state = AppState {
        service: Arc::new(service),
        config: Arc::new(config),
    };

    web::serve(state, shutdown_signal()).await?;

    info!("Shutting down...");
    scheduler.close();
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,screenshot_cache=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
