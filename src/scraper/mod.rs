//! Reference fetch-and-scrape orchestration.
//!
//! Per reference: decide live fetch vs. archive, persist the raw HTML and a
//! rendered PDF, and record the final status. Batches fan out across a
//! bounded worker pool and report progress through the job registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::{ARCHIVAL_USER_AGENT, JOBS_DIR};
use crate::db as queries;
use crate::db::{Database, Reference, ReferenceStatus};
use crate::progress::{JobEvent, JobRegistry};
use crate::renderer::PdfService;
use crate::storage::FileStorage;
use crate::wayback::ArchiveResolver;

/// Live-fetch failures, classified so access-restricted responses can divert
/// to the archive fallback while everything else propagates.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTPError: status {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("TimeoutError: request to {url} timed out")]
    Timeout { url: String },

    #[error("ConnectionError: {message}")]
    Connection { message: String },

    #[error("DecodeError: {message}")]
    Decode { message: String },
}

impl FetchError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if e.is_decode() {
            Self::Decode {
                message: e.to_string(),
            }
        } else {
            Self::Connection {
                message: e.to_string(),
            }
        }
    }

    /// Whether the response indicates an access restriction (paywall, login
    /// wall, legal block) worth retrying through the archive.
    fn is_access_denied(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. } if matches!(status.as_u16(), 401 | 402 | 403 | 451)
        )
    }
}

/// HTML obtained for a reference, with the URL it effectively came from.
struct FetchedPage {
    html: String,
    source_url: String,
    archive_timestamp: Option<chrono::DateTime<Utc>>,
}

/// Scrapes references and coordinates batch jobs.
pub struct Scraper {
    db: Database,
    storage: FileStorage,
    resolver: ArchiveResolver,
    pdf: Arc<PdfService>,
    registry: Arc<JobRegistry>,
    client: Client,
    /// Process-wide cap on concurrent reference scrapes, shared by all jobs.
    semaphore: Arc<Semaphore>,
}

impl Scraper {
    #[must_use]
    pub fn new(
        config: &Config,
        db: Database,
        storage: FileStorage,
        resolver: ArchiveResolver,
        pdf: Arc<PdfService>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            db,
            storage,
            resolver,
            pdf,
            registry,
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_scrapes)),
        }
    }

    /// Run a scrape batch to completion.
    ///
    /// Every reference is marked `scraping` and broadcast before any work is
    /// dispatched, so observers see the whole batch as in-progress at once.
    /// Completion events arrive in worker-finish order. The job summary is
    /// broadcast strictly after the last per-reference event.
    pub async fn run_batch(
        self: Arc<Self>,
        job_id: Uuid,
        references: Vec<Reference>,
        aggressive: bool,
    ) {
        info!(
            job_id = %job_id,
            count = references.len(),
            aggressive,
            "Starting scrape batch"
        );

        for reference in &references {
            if let Err(e) =
                queries::set_reference_status(self.db.pool(), reference.id, ReferenceStatus::Scraping)
                    .await
            {
                error!(
                    reference_id = reference.id,
                    "Failed to mark reference scraping: {e:#}"
                );
                continue;
            }
            self.registry
                .broadcast(
                    job_id,
                    JobEvent::ReferenceScraping {
                        job_id,
                        reference_id: reference.id,
                        url: reference.url.clone(),
                    },
                )
                .await;
        }

        let page_id = references.first().map(|r| r.page_id);

        let mut handles = Vec::new();
        for reference in references {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let scraper = Arc::clone(&self);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let (success, error) = scraper
                    .scrape_reference(job_id, &reference, aggressive)
                    .await;
                let status = if success {
                    ReferenceStatus::Scraped
                } else {
                    ReferenceStatus::Failed
                };
                scraper
                    .registry
                    .broadcast(
                        job_id,
                        JobEvent::ReferenceFinished {
                            job_id,
                            reference_id: reference.id,
                            status: status.as_str().to_string(),
                            error,
                        },
                    )
                    .await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Scrape task panicked: {e}");
            }
        }

        let (scraped, failed) = match page_id {
            Some(page_id) => match queries::count_page_outcomes(self.db.pool(), page_id).await {
                Ok(counts) => counts,
                Err(e) => {
                    error!(page_id, "Failed to count batch outcomes: {e:#}");
                    (0, 0)
                }
            },
            None => (0, 0),
        };

        self.registry
            .broadcast(
                job_id,
                JobEvent::JobCompleted {
                    job_id,
                    scraped,
                    failed,
                },
            )
            .await;
        self.registry.complete(job_id, Ok(())).await;
        info!(job_id = %job_id, scraped, failed, "Scrape batch complete");
    }

    /// Scrape one reference. Returns `(success, error_message)`.
    ///
    /// Never returns an error: failures are recorded on the reference row
    /// and reported in the tuple so the surrounding batch keeps going.
    pub async fn scrape_reference(
        &self,
        job_id: Uuid,
        reference: &Reference,
        aggressive: bool,
    ) -> (bool, Option<String>) {
        match self.scrape_reference_inner(job_id, reference, aggressive).await {
            Ok(()) => (true, None),
            Err(e) => {
                let error_msg = format!("{e:#}");
                error!(
                    reference_id = reference.id,
                    url = %reference.url,
                    "Scrape failed: {error_msg}"
                );
                if let Err(e2) =
                    queries::mark_reference_failed(self.db.pool(), reference.id, &error_msg).await
                {
                    error!(
                        reference_id = reference.id,
                        "Failed to record scrape failure: {e2:#}"
                    );
                }
                (false, Some(error_msg))
            }
        }
    }

    async fn scrape_reference_inner(
        &self,
        job_id: Uuid,
        reference: &Reference,
        aggressive: bool,
    ) -> Result<()> {
        let fetched = self.fetch_html(reference, aggressive).await?;

        let raw_rel = raw_html_path(job_id, reference.id);
        self.storage
            .save_bytes(&raw_rel, fetched.html.as_bytes())
            .await
            .context("Failed to store raw HTML")?;

        let pdf_rel = pdf_path(job_id, reference.id);
        self.pdf
            .html_to_pdf(&fetched.html, &pdf_rel)
            .await
            .context("Failed to render PDF")?;

        // Only record archive provenance when the content did not come from
        // the reference's own URL.
        let (archive_source, archive_timestamp) = if fetched.source_url == reference.url {
            (None, None)
        } else {
            let ts = fetched.archive_timestamp.unwrap_or_else(Utc::now);
            (Some(fetched.source_url.clone()), Some(ts.to_rfc3339()))
        };

        queries::mark_reference_scraped(
            self.db.pool(),
            reference.id,
            &raw_rel.to_string_lossy(),
            &pdf_rel.to_string_lossy(),
            archive_source.as_deref(),
            archive_timestamp.as_deref(),
        )
        .await?;

        info!(
            reference_id = reference.id,
            url = %reference.url,
            archived = archive_source.is_some(),
            "Reference scraped"
        );
        Ok(())
    }

    /// Fetch HTML for a reference, preferring the archive for suspected
    /// paywalls and falling back to it on access-denied responses.
    async fn fetch_html(&self, reference: &Reference, aggressive: bool) -> Result<FetchedPage> {
        if reference.suspected_paywall {
            let outcome = self.resolver.resolve(&reference.url, true, aggressive).await;
            if outcome.success {
                if let Some(html) = outcome.html {
                    return Ok(FetchedPage {
                        html,
                        source_url: outcome
                            .archive_url
                            .unwrap_or_else(|| reference.url.clone()),
                        archive_timestamp: outcome.timestamp,
                    });
                }
            }
            debug!(
                url = %reference.url,
                reason = ?outcome.reason,
                "Archive miss for paywalled reference, trying live fetch"
            );
        }

        match self.fetch_live(&reference.url).await {
            Ok(html) => Ok(FetchedPage {
                html,
                source_url: reference.url.clone(),
                archive_timestamp: None,
            }),
            Err(e) if e.is_access_denied() => {
                warn!(
                    url = %reference.url,
                    error = %e,
                    "Access denied, falling back to archive"
                );
                let outcome = self
                    .resolver
                    .resolve(&reference.url, reference.suspected_paywall, aggressive)
                    .await;
                match (outcome.success, outcome.html) {
                    (true, Some(html)) => Ok(FetchedPage {
                        html,
                        source_url: outcome
                            .archive_url
                            .unwrap_or_else(|| reference.url.clone()),
                        archive_timestamp: outcome.timestamp,
                    }),
                    _ => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_live(&self, url: &str) -> Result<String, FetchError> {
        debug!(url = %url, "Fetching live page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

/// Storage-relative location of a reference's raw HTML for a given job.
#[must_use]
pub fn raw_html_path(job_id: Uuid, reference_id: i64) -> PathBuf {
    Path::new(JOBS_DIR)
        .join(job_id.to_string())
        .join("raw")
        .join(format!("{reference_id}.html"))
}

/// Storage-relative location of a reference's rendered PDF for a given job.
#[must_use]
pub fn pdf_path(job_id: Uuid, reference_id: i64) -> PathBuf {
    Path::new(JOBS_DIR)
        .join(job_id.to_string())
        .join("pdf")
        .join(format!("{reference_id}.pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_classification() {
        for code in [401_u16, 402, 403, 451] {
            let err = FetchError::Status {
                status: StatusCode::from_u16(code).expect("valid status"),
                url: "https://example.com".to_string(),
            };
            assert!(err.is_access_denied(), "status {code} should divert");
        }

        for code in [404_u16, 429, 500, 503] {
            let err = FetchError::Status {
                status: StatusCode::from_u16(code).expect("valid status"),
                url: "https://example.com".to_string(),
            };
            assert!(!err.is_access_denied(), "status {code} should propagate");
        }

        let timeout = FetchError::Timeout {
            url: "https://example.com".to_string(),
        };
        assert!(!timeout.is_access_denied());
    }

    #[test]
    fn test_artifact_paths_are_job_scoped() {
        let job_id = Uuid::new_v4();
        let raw = raw_html_path(job_id, 12);
        let pdf = pdf_path(job_id, 12);

        assert!(raw.starts_with(Path::new(JOBS_DIR).join(job_id.to_string())));
        assert!(raw.ends_with("raw/12.html"));
        assert!(pdf.ends_with("pdf/12.pdf"));
    }

    #[test]
    fn test_fetch_error_messages_carry_type_prefix() {
        let err = FetchError::Status {
            status: StatusCode::FORBIDDEN,
            url: "https://example.com/a".to_string(),
        };
        assert!(err.to_string().starts_with("HTTPError:"));

        let err = FetchError::Timeout {
            url: "https://example.com/a".to_string(),
        };
        assert!(err.to_string().starts_with("TimeoutError:"));
    }
}
