use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::download;
use super::AppState;
use crate::db::{
    delete_page, get_page, get_page_by_url, get_page_summary, get_reference,
    get_references_by_ids, insert_page, insert_references, list_page_summaries, list_references,
    replace_references, reset_reference, update_page_title, PageSummary,
};
use crate::progress::JobKind;
use crate::wiki;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/references", post(submit_page))
        .route("/api/v1/references/:id/reset", post(reset_reference_handler))
        .route("/api/v1/scrape", post(start_scrape))
        .route("/api/v1/jobs/:job_id", get(job_status))
        .route("/api/v1/progress/:job_id", get(job_progress))
        .route("/api/v1/progress/:job_id/events", get(job_events))
        .route("/api/v1/pages", get(list_pages))
        .route(
            "/api/v1/pages/:id",
            patch(update_page).delete(delete_page_handler),
        )
        .route("/api/v1/pages/:id/references", get(page_references))
        .route("/api/v1/pages/:id/refresh", post(refresh_page))
        .route("/api/v1/pages/:id/download", get(download::download_page_pdfs))
        .route("/api/v1/download", get(download::download_selected))
        .route("/healthz", get(health))
}

// ========== Request / response bodies ==========

#[derive(Debug, Deserialize)]
pub struct SubmitPageRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub reference_ids: Vec<i64>,
    #[serde(default)]
    pub aggressive: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePageRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
struct JobStartedResponse {
    job_id: Uuid,
}

#[derive(Debug, Serialize)]
struct PageResponse {
    id: i64,
    url: String,
    title: Option<String>,
    created_at: String,
    total_refs: i64,
    scraped_refs: i64,
    percent_scraped: f64,
}

impl From<PageSummary> for PageResponse {
    fn from(summary: PageSummary) -> Self {
        let percent_scraped = summary.percent();
        Self {
            id: summary.id,
            url: summary.url,
            title: summary.title,
            created_at: summary.created_at,
            total_refs: summary.total,
            scraped_refs: summary.scraped,
            percent_scraped,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProgressItem {
    reference_id: i64,
    status: String,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    percent: f64,
    items: Vec<ProgressItem>,
}

// ========== Page submission and parsing ==========

/// Handler for submitting a Wikipedia article (POST /api/v1/references).
///
/// Parsing runs in a background task; the response carries the job ID to
/// poll or subscribe with.
async fn submit_page(
    State(state): State<AppState>,
    Json(req): Json<SubmitPageRequest>,
) -> Response {
    let url = req.url.trim().to_string();
    if !wiki::is_wikipedia_article_url(&url) {
        return (StatusCode::BAD_REQUEST, "Not a Wikipedia article URL").into_response();
    }

    let job_id = state.registry.create(JobKind::Parse).await;

    let task_state = state.clone();
    tokio::spawn(async move {
        run_parse_job(task_state, job_id, url).await;
    });

    (StatusCode::ACCEPTED, Json(JobStartedResponse { job_id })).into_response()
}

/// Handler for re-parsing an existing page (POST /api/v1/pages/:id/refresh).
async fn refresh_page(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let page = match get_page(state.db.pool(), id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Page not found").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch page: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    let job_id = state.registry.create(JobKind::Parse).await;
    state.registry.set_page(job_id, page.id).await;

    let task_state = state.clone();
    tokio::spawn(async move {
        run_parse_job(task_state, job_id, page.url).await;
    });

    (StatusCode::ACCEPTED, Json(JobStartedResponse { job_id })).into_response()
}

async fn run_parse_job(state: AppState, job_id: Uuid, url: String) {
    match parse_and_store(&state, job_id, &url).await {
        Ok(page_id) => {
            tracing::info!(job_id = %job_id, page_id, "Parse job complete");
            state.registry.complete(job_id, Ok(())).await;
        }
        Err(e) => {
            let error_msg = format!("{e:#}");
            tracing::error!(job_id = %job_id, url = %url, "Parse job failed: {error_msg}");
            state.registry.complete(job_id, Err(error_msg)).await;
        }
    }
}

/// Parse the article and upsert its citation list.
///
/// Resubmitting a known URL refreshes its references in place rather than
/// creating a duplicate page.
async fn parse_and_store(state: &AppState, job_id: Uuid, url: &str) -> anyhow::Result<i64> {
    let parsed = state.parser.parse(url).await?;

    let (page_id, reference_ids) = match get_page_by_url(state.db.pool(), url).await? {
        Some(page) => {
            if let Some(title) = &parsed.title {
                update_page_title(state.db.pool(), page.id, title).await?;
            }
            let ids = replace_references(state.db.pool(), page.id, &parsed.references).await?;
            (page.id, ids)
        }
        None => {
            let page_id = insert_page(state.db.pool(), url, parsed.title.as_deref()).await?;
            let ids = insert_references(state.db.pool(), page_id, &parsed.references).await?;
            (page_id, ids)
        }
    };

    state.registry.set_page(job_id, page_id).await;
    state.registry.set_references(job_id, reference_ids).await;
    Ok(page_id)
}

// ========== Scraping ==========

/// Handler for starting a scrape batch (POST /api/v1/scrape).
async fn start_scrape(State(state): State<AppState>, Json(req): Json<ScrapeRequest>) -> Response {
    if req.reference_ids.is_empty() {
        return (StatusCode::BAD_REQUEST, "At least one reference ID is required").into_response();
    }

    let references = match get_references_by_ids(state.db.pool(), &req.reference_ids).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to fetch references: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };
    if references.is_empty() {
        return (StatusCode::NOT_FOUND, "No matching references found").into_response();
    }

    let job_id = state.registry.create(JobKind::Scrape).await;
    state.registry.set_page(job_id, references[0].page_id).await;
    state
        .registry
        .set_references(job_id, references.iter().map(|r| r.id).collect())
        .await;

    let scraper = state.scraper.clone();
    tokio::spawn(scraper.run_batch(job_id, references, req.aggressive));

    (StatusCode::ACCEPTED, Json(JobStartedResponse { job_id })).into_response()
}

// ========== Jobs and progress ==========

async fn job_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    match state.registry.get(job_id).await {
        Some(job) => Json(job).into_response(),
        None => (StatusCode::NOT_FOUND, "Job not found").into_response(),
    }
}

/// Handler for polling job progress (GET /api/v1/progress/:job_id).
///
/// Progress is computed over the job's page, counting references in a
/// terminal state against the page total.
async fn job_progress(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    let Some(job) = state.registry.get(job_id).await else {
        return (StatusCode::NOT_FOUND, "Job not found").into_response();
    };

    let Some(page_id) = job.page_id else {
        return Json(ProgressResponse {
            percent: 0.0,
            items: Vec::new(),
        })
        .into_response();
    };

    let references = match list_references(state.db.pool(), page_id).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to fetch references: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    let total = references.len().max(1);
    let completed = references
        .iter()
        .filter(|r| r.status_enum().is_some_and(|s| s.is_terminal()))
        .count();
    let percent = completed as f64 / total as f64 * 100.0;

    let items = references
        .into_iter()
        .map(|r| ProgressItem {
            reference_id: r.id,
            status: r.status,
        })
        .collect();

    Json(ProgressResponse { percent, items }).into_response()
}

/// Handler for streaming job events (GET /api/v1/progress/:job_id/events).
///
/// Server-sent events, one per reference transition plus a final summary.
/// Slow consumers that miss events receive a `lagged` notice instead of the
/// dropped entries.
async fn job_events(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    let Some(mut rx) = state.registry.subscribe(job_id).await else {
        return (StatusCode::NOT_FOUND, "Job not found").into_response();
    };

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        yield Ok::<_, Infallible>(
                            Event::default().event(event.event_name()).data(json),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize job event: {e}");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(job_id = %job_id, missed, "Event subscriber lagged");
                    yield Ok(
                        Event::default()
                            .event("lagged")
                            .data(format!("{{\"missed\":{missed}}}")),
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default().interval(Duration::from_secs(15)))
        .into_response()
}

// ========== Pages ==========

async fn list_pages(State(state): State<AppState>) -> Response {
    match list_page_summaries(state.db.pool()).await {
        Ok(summaries) => {
            let pages: Vec<PageResponse> = summaries.into_iter().map(Into::into).collect();
            Json(pages).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to fetch pages: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

async fn page_references(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match get_page(state.db.pool(), id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Page not found").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch page: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    }

    match list_references(state.db.pool(), id).await {
        Ok(references) => Json(references).into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch references: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

/// Handler for renaming a page (PATCH /api/v1/pages/:id).
async fn update_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePageRequest>,
) -> Response {
    let title = req.title.trim();
    if title.is_empty() {
        return (StatusCode::BAD_REQUEST, "Title must not be empty").into_response();
    }

    match get_page(state.db.pool(), id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Page not found").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch page: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    }

    if let Err(e) = update_page_title(state.db.pool(), id, title).await {
        tracing::error!("Failed to update page title: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
    }

    match get_page_summary(state.db.pool(), id).await {
        Ok(Some(summary)) => Json(PageResponse::from(summary)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Page not found").into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch page summary: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

/// Handler for deleting a page (DELETE /api/v1/pages/:id).
///
/// Stored artifacts are removed best-effort before the rows go away.
async fn delete_page_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let references = match list_references(state.db.pool(), id).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to fetch references: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    for reference in &references {
        delete_stored_artifacts(&state, reference).await;
    }

    match delete_page(state.db.pool(), id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Page not found").into_response(),
        Err(e) => {
            tracing::error!("Failed to delete page: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

// ========== References ==========

/// Handler for resetting a reference to pending (POST /api/v1/references/:id/reset).
async fn reset_reference_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let reference = match get_reference(state.db.pool(), id).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Reference not found").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch reference: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    delete_stored_artifacts(&state, &reference).await;

    if let Err(e) = reset_reference(state.db.pool(), id).await {
        tracing::error!("Failed to reset reference: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
    }

    match get_reference(state.db.pool(), id).await {
        Ok(Some(r)) => Json(r).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Reference not found").into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch reference: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

/// Remove a reference's stored HTML and PDF, logging rather than failing.
async fn delete_stored_artifacts(state: &AppState, reference: &crate::db::Reference) {
    for rel in reference
        .html_path
        .iter()
        .chain(reference.pdf_path.iter())
    {
        if let Err(e) = state.storage.delete(std::path::Path::new(rel)).await {
            tracing::warn!(
                reference_id = reference.id,
                path = %rel,
                "Failed to delete stored file: {e:#}"
            );
        }
    }
}

// ========== Health ==========

async fn health() -> Response {
    (StatusCode::OK, "OK").into_response()
}
