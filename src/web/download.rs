use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::AppState;
use crate::db::{
    get_references_by_ids, list_references, list_scraped_references, Reference, ReferenceStatus,
};

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    /// Comma-separated reference IDs.
    pub ids: Option<String>,
    /// Bundle every scraped reference instead of a selection.
    #[serde(default)]
    pub all: bool,
}

/// Handler for downloading a page's PDFs (GET /api/v1/pages/:id/download).
///
/// A single available PDF is served directly; several are bundled into a ZIP
/// with one entry per reference.
pub async fn download_page_pdfs(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let references = match list_references(state.db.pool(), id).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to fetch references: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    let available = filter_available(&state, references).await;

    if available.is_empty() {
        return (StatusCode::NOT_FOUND, "No PDFs available").into_response();
    }
    if available.len() == 1 {
        let (_, relative) = &available[0];
        return serve_single_pdf(&state, relative, &format!("{id}.pdf")).await;
    }
    serve_bundle(&state, available, "references.zip").await
}

/// Handler for downloading selected references (GET /api/v1/download?ids=1,2,3).
///
/// `?all=true` bundles every scraped reference instead of a selection.
pub async fn download_selected(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Response {
    let references = if params.all {
        match list_scraped_references(state.db.pool()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to fetch references: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
            }
        }
    } else {
        let Some(ids) = params.ids.as_deref().and_then(parse_id_list) else {
            return (StatusCode::BAD_REQUEST, "Invalid reference ID list").into_response();
        };
        match get_references_by_ids(state.db.pool(), &ids).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to fetch references: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
            }
        }
    };

    let available = filter_available(&state, references).await;

    if available.is_empty() {
        return (StatusCode::NOT_FOUND, "No PDFs available").into_response();
    }
    if available.len() == 1 {
        let (ref_id, relative) = &available[0];
        return serve_single_pdf(&state, relative, &format!("{ref_id}.pdf")).await;
    }
    serve_bundle(&state, available, "bundle.zip").await
}

/// Parse a comma-separated ID list, deduplicating while preserving order.
fn parse_id_list(raw: &str) -> Option<Vec<i64>> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: i64 = part.parse().ok()?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// Keep only scraped references whose PDF is actually on disk.
async fn filter_available(state: &AppState, references: Vec<Reference>) -> Vec<(i64, PathBuf)> {
    let mut available = Vec::new();
    for reference in references {
        if reference.status_enum() != Some(ReferenceStatus::Scraped) {
            continue;
        }
        let Some(rel) = reference.pdf_path else {
            continue;
        };
        let rel = PathBuf::from(rel);
        if state.storage.exists(&rel).await {
            available.push((reference.id, rel));
        }
    }
    available
}

async fn serve_single_pdf(
    state: &AppState,
    relative: &std::path::Path,
    filename: &str,
) -> Response {
    let abs = state.storage.resolve(relative);
    let file = match tokio::fs::File::open(&abs).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %abs.display(), "Failed to open stored PDF: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read PDF").into_response();
        }
    };

    let body = Body::from_stream(ReaderStream::new(file));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                &format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

async fn serve_bundle(
    state: &AppState,
    references: Vec<(i64, PathBuf)>,
    filename: &str,
) -> Response {
    let count = references.len();
    let zip_bytes = match build_pdf_bundle(state, references).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to build PDF bundle: {e:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build ZIP").into_response();
        }
    };

    tracing::info!(entries = count, bytes = zip_bytes.len(), "Serving PDF bundle");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                &format!("attachment; filename=\"{filename}\""),
            ),
            (header::CONTENT_LENGTH, &zip_bytes.len().to_string()),
        ],
        zip_bytes,
    )
        .into_response()
}

/// Read each referenced PDF and pack them into an in-memory ZIP.
///
/// Unreadable files are skipped with a warning so one bad artifact does not
/// sink the whole download.
async fn build_pdf_bundle(
    state: &AppState,
    references: Vec<(i64, PathBuf)>,
) -> anyhow::Result<Vec<u8>> {
    let mut entries = Vec::with_capacity(references.len());
    for (ref_id, rel) in references {
        match state.storage.read(&rel).await {
            Ok(bytes) => entries.push((format!("{ref_id}.pdf"), bytes)),
            Err(e) => {
                tracing::warn!(reference_id = ref_id, "Skipping unreadable PDF: {e:#}");
            }
        }
    }

    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let mut zip_buffer = Vec::new();
        let mut zip = ZipWriter::new(Cursor::new(&mut zip_buffer));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in entries {
            zip.start_file(&name, options)
                .with_context(|| format!("Failed to add {name} to ZIP"))?;
            std::io::Write::write_all(&mut zip, &bytes)
                .with_context(|| format!("Failed to write {name} to ZIP"))?;
        }

        zip.finish().context("Failed to finalize ZIP")?;
        Ok(zip_buffer)
    })
    .await
    .context("ZIP generation task panicked")?
}
