use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{NewReference, PageSummary, Reference, ReferenceStatus, WikiPage};

// ========== Pages ==========

/// Insert a new page, returning its ID.
pub async fn insert_page(pool: &SqlitePool, url: &str, title: Option<&str>) -> Result<i64> {
    let result = sqlx::query("INSERT INTO wiki_pages (url, title) VALUES (?, ?)")
        .bind(url)
        .bind(title)
        .execute(pool)
        .await
        .context("Failed to insert page")?;

    Ok(result.last_insert_rowid())
}

/// Get a page by its ID.
pub async fn get_page(pool: &SqlitePool, id: i64) -> Result<Option<WikiPage>> {
    sqlx::query_as("SELECT * FROM wiki_pages WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch page")
}

/// Get a page by its source URL.
pub async fn get_page_by_url(pool: &SqlitePool, url: &str) -> Result<Option<WikiPage>> {
    sqlx::query_as("SELECT * FROM wiki_pages WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch page by url")
}

/// Update a page's title.
pub async fn update_page_title(pool: &SqlitePool, id: i64, title: &str) -> Result<()> {
    sqlx::query("UPDATE wiki_pages SET title = ? WHERE id = ?")
        .bind(title)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update page title")?;

    Ok(())
}

/// Delete a page. References are removed by the FK cascade.
///
/// Returns `false` if no page with that ID existed.
pub async fn delete_page(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM wiki_pages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete page")?;

    Ok(result.rows_affected() > 0)
}

/// List all pages with per-page reference counts, newest first.
pub async fn list_page_summaries(pool: &SqlitePool) -> Result<Vec<PageSummary>> {
    sqlx::query_as(
        r"
        SELECT
            p.id,
            p.url,
            p.title,
            p.created_at,
            COUNT(r.id) AS total,
            COALESCE(SUM(CASE WHEN r.status = 'scraped' THEN 1 ELSE 0 END), 0) AS scraped
        FROM wiki_pages p
        LEFT JOIN page_references r ON r.page_id = p.id
        GROUP BY p.id
        ORDER BY p.created_at DESC, p.id DESC
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch page summaries")
}

/// Get one page's summary with reference counts.
pub async fn get_page_summary(pool: &SqlitePool, id: i64) -> Result<Option<PageSummary>> {
    sqlx::query_as(
        r"
        SELECT
            p.id,
            p.url,
            p.title,
            p.created_at,
            COUNT(r.id) AS total,
            COALESCE(SUM(CASE WHEN r.status = 'scraped' THEN 1 ELSE 0 END), 0) AS scraped
        FROM wiki_pages p
        LEFT JOIN page_references r ON r.page_id = p.id
        WHERE p.id = ?
        GROUP BY p.id
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch page summary")
}

// ========== References ==========

/// Insert a parsed reference for a page, returning its ID.
pub async fn insert_reference(pool: &SqlitePool, page_id: i64, re: &NewReference) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO page_references (page_id, url, title, suspected_paywall)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(page_id)
    .bind(&re.url)
    .bind(&re.title)
    .bind(re.suspected_paywall)
    .execute(pool)
    .await
    .context("Failed to insert reference")?;

    Ok(result.last_insert_rowid())
}

/// Insert a batch of parsed references for a page.
pub async fn insert_references(
    pool: &SqlitePool,
    page_id: i64,
    refs: &[NewReference],
) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(refs.len());
    for re in refs {
        ids.push(insert_reference(pool, page_id, re).await?);
    }
    Ok(ids)
}

/// Atomically replace a page's references with a freshly parsed set.
///
/// Runs delete-then-insert in one transaction so a concurrent reader never
/// observes a half-replaced list.
pub async fn replace_references(
    pool: &SqlitePool,
    page_id: i64,
    refs: &[NewReference],
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM page_references WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete old references")?;

    let mut ids = Vec::with_capacity(refs.len());
    for re in refs {
        let result = sqlx::query(
            r"
            INSERT INTO page_references (page_id, url, title, suspected_paywall)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(page_id)
        .bind(&re.url)
        .bind(&re.title)
        .bind(re.suspected_paywall)
        .execute(&mut *tx)
        .await
        .context("Failed to insert replacement reference")?;
        ids.push(result.last_insert_rowid());
    }

    tx.commit().await.context("Failed to commit reference replacement")?;
    Ok(ids)
}

/// List a page's references in insertion order.
pub async fn list_references(pool: &SqlitePool, page_id: i64) -> Result<Vec<Reference>> {
    sqlx::query_as("SELECT * FROM page_references WHERE page_id = ? ORDER BY id")
        .bind(page_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch references")
}

/// List every scraped reference across all pages, in insertion order.
pub async fn list_scraped_references(pool: &SqlitePool) -> Result<Vec<Reference>> {
    sqlx::query_as("SELECT * FROM page_references WHERE status = 'scraped' ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to fetch scraped references")
}

/// Get a reference by its ID.
pub async fn get_reference(pool: &SqlitePool, id: i64) -> Result<Option<Reference>> {
    sqlx::query_as("SELECT * FROM page_references WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch reference")
}

/// Get references by ID, in the order given. Unknown IDs are skipped.
pub async fn get_references_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Reference>> {
    let mut refs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(re) = get_reference(pool, *id).await? {
            refs.push(re);
        }
    }
    Ok(refs)
}

/// Set a reference's status.
pub async fn set_reference_status(
    pool: &SqlitePool,
    id: i64,
    status: ReferenceStatus,
) -> Result<()> {
    sqlx::query("UPDATE page_references SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to set reference status")?;

    Ok(())
}

/// Record a successful scrape: artifact paths, optional archive provenance,
/// scrape time, and the `scraped` status in one write.
pub async fn mark_reference_scraped(
    pool: &SqlitePool,
    id: i64,
    html_path: &str,
    pdf_path: &str,
    archive_source: Option<&str>,
    archive_timestamp: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE page_references
        SET status = 'scraped', html_path = ?, pdf_path = ?,
            archive_source = ?, archive_timestamp = ?,
            error_message = NULL, scraped_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(html_path)
    .bind(pdf_path)
    .bind(archive_source)
    .bind(archive_timestamp)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark reference scraped")?;

    Ok(())
}

/// Record a failed scrape with its error message.
pub async fn mark_reference_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r"
        UPDATE page_references
        SET status = 'failed', error_message = ?
        WHERE id = ?
        ",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark reference failed")?;

    Ok(())
}

/// Discard a reference's prior results: back to `pending` with artifact
/// paths, archive provenance, and error state cleared.
pub async fn reset_reference(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        r"
        UPDATE page_references
        SET status = 'pending', html_path = NULL, pdf_path = NULL,
            archive_source = NULL, archive_timestamp = NULL,
            error_message = NULL, scraped_at = NULL
        WHERE id = ?
        ",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to reset reference")?;

    Ok(())
}

/// Count a page's references now `scraped` vs `failed`, for job summaries.
pub async fn count_page_outcomes(pool: &SqlitePool, page_id: i64) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        r"
        SELECT
            COALESCE(SUM(CASE WHEN status = 'scraped' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
        FROM page_references
        WHERE page_id = ?
        ",
    )
    .bind(page_id)
    .fetch_one(pool)
    .await
    .context("Failed to count page outcomes")?;

    Ok(row)
}
