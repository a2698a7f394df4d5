use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wikiref_archiver::config::Config;
use wikiref_archiver::db::Database;
use wikiref_archiver::progress::JobRegistry;
use wikiref_archiver::renderer::{
    ChromiumConfig, ChromiumLauncher, ChromiumRenderer, HtmlRenderer, PdfService, RenderPool,
};
use wikiref_archiver::scraper::Scraper;
use wikiref_archiver::storage::FileStorage;
use wikiref_archiver::wayback::ArchiveResolver;
use wikiref_archiver::web::{self, AppState};
use wikiref_archiver::wiki::WikiParser;

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

    // Initialize logging
    init_tracing()?;

    info!("Starting wikiref-archiver");

    // Load and validate configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    // Ensure data directories exist
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    // Initialize database
    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let storage = FileStorage::new(config.data_dir.clone());

    // Start the renderer pool when Chromium rendering is enabled
    let render_pool = if config.chromium_enabled {
        let launcher = ChromiumLauncher::new(ChromiumConfig {
            executable: config.chromium_path.clone(),
            page_timeout: config.fetch_timeout,
        });
        let pool = Arc::new(RenderPool::new(launcher, config.renderer_pool_size));
        pool.start().await.context("Failed to start renderer pool")?;
        info!(size = config.renderer_pool_size, "Renderer pool started");
        Some(pool)
    } else {
        info!("Chromium rendering disabled, PDFs will use the text fallback");
        None
    };

    let primary: Option<Arc<dyn HtmlRenderer>> = render_pool.as_ref().map(|pool| {
        Arc::new(ChromiumRenderer::new(pool.clone(), storage.clone())) as Arc<dyn HtmlRenderer>
    });
    let pdf = Arc::new(PdfService::new(storage.clone(), primary));

    let resolver = ArchiveResolver::new(config.wayback_timeout);
    let registry = Arc::new(JobRegistry::new());
    let scraper = Arc::new(Scraper::new(
        &config,
        db.clone(),
        storage.clone(),
        resolver,
        pdf,
        registry.clone(),
    ));
    let parser = Arc::new(WikiParser::new(config.fetch_timeout));

    // Start web server in background
    let state = AppState {
        db,
        storage,
        config: Arc::new(config),
        registry,
        scraper,
        parser,
    };
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(state).await {
            error!("Web server error: {e:#}");
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");

    // Cancel tasks
    web_handle.abort();

    if let Some(pool) = render_pool {
        pool.stop().await;
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wikiref_archiver=debug"));

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
        // Pretty-printed logging for development
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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
