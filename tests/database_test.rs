//! Integration tests for database operations.

use tempfile::TempDir;
use wikiref_archiver::db::{
    count_page_outcomes, delete_page, get_page, get_page_by_url, get_page_summary, get_reference,
    get_references_by_ids, insert_page, insert_reference, insert_references, list_page_summaries,
    list_references, mark_reference_failed, mark_reference_scraped, replace_references,
    reset_reference, set_reference_status, update_page_title, Database, NewReference,
    ReferenceStatus,
};

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn new_ref(url: &str) -> NewReference {
    NewReference {
        url: url.to_string(),
        title: Some(format!("Title for {url}")),
        suspected_paywall: false,
    }
}

#[tokio::test]
async fn test_insert_and_get_page() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(
        db.pool(),
        "https://en.wikipedia.org/wiki/Rust_(programming_language)",
        Some("Rust (programming language)"),
    )
    .await
    .expect("Failed to insert page");
    assert!(page_id > 0);

    let page = get_page(db.pool(), page_id)
        .await
        .expect("Failed to get page")
        .expect("Page not found");
    assert_eq!(page.title.as_deref(), Some("Rust (programming language)"));

    let by_url = get_page_by_url(
        db.pool(),
        "https://en.wikipedia.org/wiki/Rust_(programming_language)",
    )
    .await
    .expect("Failed to get page by url")
    .expect("Page not found by url");
    assert_eq!(by_url.id, page_id);
}

#[tokio::test]
async fn test_duplicate_page_url_is_rejected() {
    let (db, _temp_dir) = setup_db().await;

    insert_page(db.pool(), "https://en.wikipedia.org/wiki/Ada", None)
        .await
        .expect("First insert should succeed");

    let duplicate = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Ada", None).await;
    assert!(duplicate.is_err(), "URL must be unique");
}

#[tokio::test]
async fn test_reopening_database_is_idempotent() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");

    {
        let db = Database::new(&db_path)
            .await
            .expect("Failed to create database");
        insert_page(db.pool(), "https://en.wikipedia.org/wiki/Sqlite", None)
            .await
            .expect("Failed to insert page");
    }

    // Second open runs migrations against the existing schema and must not
    // disturb the data.
    let db = Database::new(&db_path)
        .await
        .expect("Failed to reopen database");
    let page = get_page_by_url(db.pool(), "https://en.wikipedia.org/wiki/Sqlite")
        .await
        .expect("Failed to query reopened database");
    assert!(page.is_some());
}

#[tokio::test]
async fn test_insert_and_list_references() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Test", None)
        .await
        .unwrap();

    let refs = vec![
        new_ref("https://example.com/a"),
        new_ref("https://example.com/b"),
        NewReference {
            url: "https://www.wsj.com/articles/x".to_string(),
            title: None,
            suspected_paywall: true,
        },
    ];
    let ids = insert_references(db.pool(), page_id, &refs)
        .await
        .expect("Failed to insert references");
    assert_eq!(ids.len(), 3);

    let listed = list_references(db.pool(), page_id)
        .await
        .expect("Failed to list references");
    assert_eq!(listed.len(), 3);
    // Listing is ordered by insertion.
    assert_eq!(listed[0].url, "https://example.com/a");
    assert_eq!(listed[2].url, "https://www.wsj.com/articles/x");
    assert!(listed[2].suspected_paywall);
    assert_eq!(listed[0].status, "pending");
    assert!(listed[0].html_path.is_none());
}

#[tokio::test]
async fn test_replace_references_swaps_the_whole_set() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Replace", None)
        .await
        .unwrap();
    insert_references(
        db.pool(),
        page_id,
        &[new_ref("https://old.example.com/1"), new_ref("https://old.example.com/2")],
    )
    .await
    .unwrap();

    let new_ids = replace_references(
        db.pool(),
        page_id,
        &[
            new_ref("https://new.example.com/1"),
            new_ref("https://new.example.com/2"),
            new_ref("https://new.example.com/3"),
        ],
    )
    .await
    .expect("Failed to replace references");
    assert_eq!(new_ids.len(), 3);

    let listed = list_references(db.pool(), page_id).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|r| r.url.starts_with("https://new.")));
    assert!(listed.iter().all(|r| r.status == "pending"));
}

#[tokio::test]
async fn test_reference_status_transitions() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Status", None)
        .await
        .unwrap();
    let ref_id = insert_reference(db.pool(), page_id, &new_ref("https://example.com/s"))
        .await
        .unwrap();

    set_reference_status(db.pool(), ref_id, ReferenceStatus::Scraping)
        .await
        .expect("Failed to set status");
    let reference = get_reference(db.pool(), ref_id).await.unwrap().unwrap();
    assert_eq!(reference.status, "scraping");
    assert!(reference.scraped_at.is_none());

    mark_reference_scraped(
        db.pool(),
        ref_id,
        "jobs/j1/raw/1.html",
        "jobs/j1/pdf/1.pdf",
        Some("https://web.archive.org/web/20200101000000/https://example.com/s"),
        Some("2020-01-01T00:00:00+00:00"),
    )
    .await
    .expect("Failed to mark scraped");

    let reference = get_reference(db.pool(), ref_id).await.unwrap().unwrap();
    assert_eq!(reference.status, "scraped");
    assert_eq!(reference.html_path.as_deref(), Some("jobs/j1/raw/1.html"));
    assert_eq!(reference.pdf_path.as_deref(), Some("jobs/j1/pdf/1.pdf"));
    assert!(reference.archive_source.is_some());
    assert!(reference.archive_timestamp.is_some());
    assert!(reference.scraped_at.is_some());
    assert!(reference.error_message.is_none());
}

#[tokio::test]
async fn test_mark_reference_failed_records_error() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Fail", None)
        .await
        .unwrap();
    let ref_id = insert_reference(db.pool(), page_id, &new_ref("https://example.com/f"))
        .await
        .unwrap();

    mark_reference_failed(
        db.pool(),
        ref_id,
        "HTTPError: status 404 Not Found for https://example.com/f",
    )
    .await
    .expect("Failed to mark failed");

    let reference = get_reference(db.pool(), ref_id).await.unwrap().unwrap();
    assert_eq!(reference.status, "failed");
    assert!(reference
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("HTTPError:")));
}

#[tokio::test]
async fn test_reset_reference_clears_scrape_results() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Reset", None)
        .await
        .unwrap();
    let ref_id = insert_reference(db.pool(), page_id, &new_ref("https://example.com/r"))
        .await
        .unwrap();

    mark_reference_scraped(
        db.pool(),
        ref_id,
        "jobs/j1/raw/1.html",
        "jobs/j1/pdf/1.pdf",
        None,
        None,
    )
    .await
    .unwrap();

    reset_reference(db.pool(), ref_id)
        .await
        .expect("Failed to reset reference");

    let reference = get_reference(db.pool(), ref_id).await.unwrap().unwrap();
    assert_eq!(reference.status, "pending");
    assert!(reference.html_path.is_none());
    assert!(reference.pdf_path.is_none());
    assert!(reference.archive_source.is_none());
    assert!(reference.error_message.is_none());
    assert!(reference.scraped_at.is_none());
}

#[tokio::test]
async fn test_delete_page_cascades_to_references() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Cascade", None)
        .await
        .unwrap();
    let ref_ids = insert_references(
        db.pool(),
        page_id,
        &[new_ref("https://example.com/1"), new_ref("https://example.com/2")],
    )
    .await
    .unwrap();

    let deleted = delete_page(db.pool(), page_id)
        .await
        .expect("Failed to delete page");
    assert!(deleted);

    assert!(get_page(db.pool(), page_id).await.unwrap().is_none());
    for ref_id in ref_ids {
        assert!(
            get_reference(db.pool(), ref_id).await.unwrap().is_none(),
            "reference {ref_id} should be gone"
        );
    }

    // Deleting again reports that nothing was there.
    let deleted = delete_page(db.pool(), page_id).await.unwrap();
    assert!(!deleted);
}

#[tokio::test]
async fn test_get_references_by_ids_skips_unknown() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/ByIds", None)
        .await
        .unwrap();
    let ids = insert_references(
        db.pool(),
        page_id,
        &[new_ref("https://example.com/1"), new_ref("https://example.com/2")],
    )
    .await
    .unwrap();

    let mut requested = ids.clone();
    requested.push(99_999);
    let found = get_references_by_ids(db.pool(), &requested).await.unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_page_summary_counts() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(
        db.pool(),
        "https://en.wikipedia.org/wiki/Summary",
        Some("Summary"),
    )
    .await
    .unwrap();
    let ids = insert_references(
        db.pool(),
        page_id,
        &[
            new_ref("https://example.com/1"),
            new_ref("https://example.com/2"),
            new_ref("https://example.com/3"),
        ],
    )
    .await
    .unwrap();

    mark_reference_scraped(db.pool(), ids[0], "raw.html", "out.pdf", None, None)
        .await
        .unwrap();
    mark_reference_failed(db.pool(), ids[1], "ConnectionError: refused")
        .await
        .unwrap();

    let summary = get_page_summary(db.pool(), page_id)
        .await
        .unwrap()
        .expect("Summary should exist");
    assert_eq!(summary.total, 3);
    assert_eq!(summary.scraped, 1);
    assert!((summary.percent() - 33.333).abs() < 0.01);

    let (scraped, failed) = count_page_outcomes(db.pool(), page_id).await.unwrap();
    assert_eq!(scraped, 1);
    assert_eq!(failed, 1);

    let all = list_page_summaries(db.pool()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, page_id);
}

#[tokio::test]
async fn test_summary_percent_with_no_references() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Empty", None)
        .await
        .unwrap();

    let summary = get_page_summary(db.pool(), page_id)
        .await
        .unwrap()
        .expect("Summary should exist");
    assert_eq!(summary.total, 0);
    assert!((summary.percent() - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_update_page_title() {
    let (db, _temp_dir) = setup_db().await;

    let page_id = insert_page(db.pool(), "https://en.wikipedia.org/wiki/Rename", None)
        .await
        .unwrap();

    update_page_title(db.pool(), page_id, "Renamed")
        .await
        .expect("Failed to update title");

    let page = get_page(db.pool(), page_id).await.unwrap().unwrap();
    assert_eq!(page.title.as_deref(), Some("Renamed"));
}
