mod download;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::progress::JobRegistry;
use crate::scraper::Scraper;
use crate::storage::FileStorage;
use crate::wiki::WikiParser;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: FileStorage,
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub scraper: Arc<Scraper>,
    pub parser: Arc<WikiParser>,
}

/// Start the web server and run until the surrounding task is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.web_host, state.config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app).await.context("Web server error")
}

/// Create the application router with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
