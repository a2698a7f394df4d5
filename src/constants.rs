//! Shared constants used across the application.

/// User agent string used for archival HTTP requests.
///
/// This is a realistic browser user agent that is indistinguishable from a real browser,
/// making archival requests appear as normal browser traffic.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Wayback Machine availability API endpoint.
pub const WAYBACK_AVAILABILITY_URL: &str = "https://archive.org/wayback/available";

/// Wayback Machine save-page-now endpoint prefix (the target URL is appended).
pub const WAYBACK_SAVE_URL: &str = "https://web.archive.org/save/";

/// Seconds a caller should wait before re-resolving after a save was triggered.
pub const WAYBACK_SAVE_RETRY_AFTER_SECS: u64 = 60;

/// Relative directory (under the storage root) holding per-job artifacts.
pub const JOBS_DIR: &str = "jobs";
