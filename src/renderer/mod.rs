//! PDF rendering for scraped pages.
//!
//! A pool of chromium instances produces high-fidelity prints; when
//! chromium is disabled or a print fails, a text-only renderer takes over
//! so every scraped reference still ends up with a PDF on disk.

mod chromium;
mod pool;
mod text;

pub use chromium::{ChromiumConfig, ChromiumEngine, ChromiumLauncher};
pub use pool::{EngineLauncher, PoolError, RenderEngine, RenderPool};
pub use text::render_text_pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, warn};
use url::Url;

use crate::storage::FileStorage;

/// Renders HTML into PDF bytes.
///
/// `destination` is the storage-relative path the PDF will be saved under;
/// implementations may place scratch files next to it.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    async fn render(&self, html: &str, destination: &Path) -> Result<Vec<u8>>;
}

/// High-fidelity renderer backed by the chromium pool.
pub struct ChromiumRenderer {
    pool: Arc<RenderPool<ChromiumLauncher>>,
    storage: FileStorage,
}

impl ChromiumRenderer {
    #[must_use]
    pub fn new(pool: Arc<RenderPool<ChromiumLauncher>>, storage: FileStorage) -> Self {
        Self { pool, storage }
    }
}

#[async_trait]
impl HtmlRenderer for ChromiumRenderer {
    async fn render(&self, html: &str, destination: &Path) -> Result<Vec<u8>> {
        // Chromium prints from a file URL; a scratch copy next to the PDF
        // keeps the page self-contained.
        let scratch = destination.with_extension("html");
        let scratch_abs = self.storage.save_bytes(&scratch, html.as_bytes()).await?;
        let file_url = Url::from_file_path(&scratch_abs)
            .map_err(|()| anyhow!("Scratch path is not absolute: {}", scratch_abs.display()))?;

        let url = file_url.to_string();
        let result = self
            .pool
            .with_engine(move |engine: &ChromiumEngine| {
                async move { engine.print_pdf(&url).await }.boxed()
            })
            .await;

        if let Err(e) = self.storage.delete(&scratch).await {
            debug!(error = %format!("{e:#}"), "Failed to remove scratch HTML");
        }

        result
    }
}

/// Last-resort renderer; works without a browser.
pub struct TextRenderer;

#[async_trait]
impl HtmlRenderer for TextRenderer {
    async fn render(&self, html: &str, _destination: &Path) -> Result<Vec<u8>> {
        render_text_pdf(html)
    }
}

/// Renders and persists PDFs, preferring the high-fidelity renderer and
/// falling back to the text renderer when it is missing or fails.
pub struct PdfService {
    storage: FileStorage,
    primary: Option<Arc<dyn HtmlRenderer>>,
    fallback: TextRenderer,
}

impl PdfService {
    #[must_use]
    pub fn new(storage: FileStorage, primary: Option<Arc<dyn HtmlRenderer>>) -> Self {
        Self {
            storage,
            primary,
            fallback: TextRenderer,
        }
    }

    /// Render `html` and store the result at `destination`, relative to the
    /// storage root. Returns the absolute path of the stored PDF.
    ///
    /// # Errors
    ///
    /// Returns an error only when the fallback renderer or the filesystem
    /// write fails; primary-renderer failures are downgraded to the text
    /// fallback.
    pub async fn html_to_pdf(&self, html: &str, destination: &Path) -> Result<PathBuf> {
        let bytes = match &self.primary {
            Some(renderer) => match renderer.render(html, destination).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        error = %format!("{e:#}"),
                        destination = %destination.display(),
                        "High-fidelity render failed, using text fallback"
                    );
                    self.fallback.render(html, destination).await?
                }
            },
            None => self.fallback.render(html, destination).await?,
        };

        self.storage
            .save_bytes(destination, &bytes)
            .await
            .context("Failed to store rendered PDF")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedRenderer(Vec<u8>);

    #[async_trait]
    impl HtmlRenderer for FixedRenderer {
        async fn render(&self, _html: &str, _destination: &Path) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl HtmlRenderer for FailingRenderer {
        async fn render(&self, _html: &str, _destination: &Path) -> Result<Vec<u8>> {
            anyhow::bail!("browser tipped over")
        }
    }

    #[tokio::test]
    async fn test_primary_renderer_output_is_stored() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(dir.path());
        let service = PdfService::new(
            storage,
            Some(Arc::new(FixedRenderer(b"%PDF-primary".to_vec()))),
        );

        let path = service
            .html_to_pdf("<p>hi</p>", Path::new("pdf/1.pdf"))
            .await
            .expect("render");

        let stored = std::fs::read(path).expect("read stored pdf");
        assert_eq!(stored, b"%PDF-primary");
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(dir.path());
        let service = PdfService::new(storage, Some(Arc::new(FailingRenderer)));

        let path = service
            .html_to_pdf("<p>still archived</p>", Path::new("pdf/2.pdf"))
            .await
            .expect("fallback render");

        let stored = std::fs::read(path).expect("read stored pdf");
        assert!(stored.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_text_renderer_used_when_no_primary_configured() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(dir.path());
        let service = PdfService::new(storage, None);

        let path = service
            .html_to_pdf("<p>plain</p>", Path::new("3.pdf"))
            .await
            .expect("render");

        let stored = std::fs::read(path).expect("read stored pdf");
        assert!(stored.starts_with(b"%PDF"));
    }
}
