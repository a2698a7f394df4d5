//! Headless-chromium rendering engine.
//!
//! Each [`ChromiumEngine`] owns one browser process plus the spawned task
//! that drives its CDP event loop. Engines are launched by the pool and
//! print pages to PDF over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pool::{EngineLauncher, RenderEngine};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 800;

// A4 paper for the CDP print call, which takes inches.
const A4_WIDTH_INCHES: f64 = 8.27;
const A4_HEIGHT_INCHES: f64 = 11.69;
const MARGIN_VERTICAL_MM: f64 = 10.0;
const MARGIN_HORIZONTAL_MM: f64 = 12.0;
const MM_PER_INCH: f64 = 25.4;

fn mm_to_inches(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

/// Launch settings shared by every engine instance.
#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Explicit browser binary; autodetected from PATH when `None`.
    pub executable: Option<PathBuf>,
    /// Upper bound for navigation and the print call itself.
    pub page_timeout: Duration,
}

/// Launches [`ChromiumEngine`] instances for the renderer pool.
pub struct ChromiumLauncher {
    config: ChromiumConfig,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    type Engine = ChromiumEngine;

    async fn launch(&self) -> Result<ChromiumEngine> {
        ChromiumEngine::launch(&self.config).await
    }
}

pub struct ChromiumEngine {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl ChromiumEngine {
    async fn launch(config: &ChromiumConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .request_timeout(config.page_timeout)
            .no_sandbox()
            .args(vec![
                "--headless=new",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-software-rasterizer",
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-background-networking",
                "--disable-extensions",
                "--disable-sync",
                "--disable-translate",
                "--mute-audio",
                "--hide-scrollbars",
            ]);

        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch chromium")?;

        // Drive CDP events for the lifetime of the browser process.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// Navigate to `url` and print the document as an A4 PDF.
    pub async fn print_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let page = self
            .browser
            .new_page(url)
            .await
            .context("Failed to open page")?;

        let result = async {
            page.wait_for_navigation()
                .await
                .context("Page failed to load")?;

            let params = PrintToPdfParams {
                print_background: Some(true),
                prefer_css_page_size: Some(false),
                paper_width: Some(A4_WIDTH_INCHES),
                paper_height: Some(A4_HEIGHT_INCHES),
                margin_top: Some(mm_to_inches(MARGIN_VERTICAL_MM)),
                margin_bottom: Some(mm_to_inches(MARGIN_VERTICAL_MM)),
                margin_left: Some(mm_to_inches(MARGIN_HORIZONTAL_MM)),
                margin_right: Some(mm_to_inches(MARGIN_HORIZONTAL_MM)),
                ..Default::default()
            };

            page.pdf(params).await.context("Failed to print page")
        }
        .await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        result
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn close(&mut self) -> Result<()> {
        let result = self
            .browser
            .close()
            .await
            .context("Failed to close browser");
        // The handler task ends when the browser connection drops; abort
        // covers the case where close itself failed.
        self.handler_task.abort();
        result.map(|_| ())
    }
}
