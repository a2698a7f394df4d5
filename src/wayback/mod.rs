use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use crate::constants::{
    ARCHIVAL_USER_AGENT, WAYBACK_AVAILABILITY_URL, WAYBACK_SAVE_RETRY_AFTER_SECS, WAYBACK_SAVE_URL,
};

/// Result of one snapshot resolution attempt.
///
/// Resolution never raises: failures are reported through `success` and
/// `reason` so the scraper can fall back to the live page.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOutcome {
    pub success: bool,
    pub archive_url: Option<String>,
    pub html: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub retry_after: Option<Duration>,
}

impl ArchiveOutcome {
    fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// The closest snapshot reported by the availability API.
struct Snapshot {
    url: String,
    timestamp: Option<String>,
}

/// Resolves archived snapshots of a URL via the Wayback Machine.
pub struct ArchiveResolver {
    client: Client,
    availability_url: String,
    save_url_prefix: String,
}

impl ArchiveResolver {
    /// Create a resolver against the public Wayback Machine endpoints.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoints(
            WAYBACK_AVAILABILITY_URL.to_string(),
            WAYBACK_SAVE_URL.to_string(),
            timeout,
        )
    }

    /// Create a resolver pointed at alternate endpoints. Used by tests.
    #[must_use]
    pub fn with_endpoints(availability_url: String, save_url_prefix: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            availability_url,
            save_url_prefix,
        }
    }

    /// Resolve an archived snapshot for `url`.
    ///
    /// Non-aggressive: report `no-snapshot` when the availability index has
    /// nothing. Aggressive: additionally fire a save-page-now request and
    /// return immediately with a retry hint rather than waiting for the
    /// snapshot to materialize.
    pub async fn resolve(&self, url: &str, suspected_paywall: bool, aggressive: bool) -> ArchiveOutcome {
        debug!(url = %url, suspected_paywall, aggressive, "Resolving archived snapshot");

        match self.try_resolve(url, aggressive).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(url = %url, error = %format!("{e:#}"), "Archive resolution failed");
                ArchiveOutcome::failure(format!("{e:#}"))
            }
        }
    }

    async fn try_resolve(&self, url: &str, aggressive: bool) -> Result<ArchiveOutcome> {
        if let Some(snapshot) = self.check_availability(url).await? {
            return self.fetch_snapshot(snapshot).await;
        }

        if aggressive {
            // Save errors are swallowed: the trigger is best-effort and the
            // outcome below tells the caller when to come back either way.
            self.trigger_save(url).await;
            return Ok(ArchiveOutcome {
                retry_after: Some(Duration::from_secs(WAYBACK_SAVE_RETRY_AFTER_SECS)),
                ..ArchiveOutcome::failure("wayback-save-triggered")
            });
        }

        Ok(ArchiveOutcome::failure("no-snapshot"))
    }

    /// Query the availability index for the closest snapshot of `url`.
    async fn check_availability(&self, url: &str) -> Result<Option<Snapshot>> {
        let check_url = format!("{}?url={}", self.availability_url, urlencoding::encode(url));

        let response = self
            .client
            .get(&check_url)
            .send()
            .await
            .context("Failed to query Wayback availability")?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Wayback availability response")?;

        let Some(closest) = json.get("archived_snapshots").and_then(|s| s.get("closest")) else {
            return Ok(None);
        };
        let Some(snapshot_url) = closest.get("url").and_then(|u| u.as_str()) else {
            return Ok(None);
        };

        let timestamp = closest
            .get("timestamp")
            .and_then(|t| t.as_str())
            .map(String::from);

        Ok(Some(Snapshot {
            url: snapshot_url.to_string(),
            timestamp,
        }))
    }

    /// Fetch the snapshot content itself.
    async fn fetch_snapshot(&self, snapshot: Snapshot) -> Result<ArchiveOutcome> {
        let response = self
            .client
            .get(&snapshot.url)
            .send()
            .await
            .context("Failed to fetch archived snapshot")?;

        if !response.status().is_success() {
            anyhow::bail!("Snapshot fetch returned HTTP {}", response.status());
        }

        let html = response
            .text()
            .await
            .context("Failed to read archived snapshot body")?;

        // A snapshot without a timestamp is still a usable snapshot.
        let timestamp = snapshot
            .timestamp
            .as_deref()
            .and_then(parse_wayback_timestamp);

        Ok(ArchiveOutcome {
            success: true,
            archive_url: Some(snapshot.url),
            html: Some(html),
            source: Some("wayback".to_string()),
            timestamp,
            reason: None,
            retry_after: None,
        })
    }

    /// Ask the Wayback Machine to archive `url` now. Best-effort.
    async fn trigger_save(&self, url: &str) {
        let save_url = format!("{}{url}", self.save_url_prefix);

        match self.client.get(&save_url).send().await {
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Triggered Wayback save");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Wayback save trigger failed");
            }
        }
    }
}

/// Parse Wayback's `YYYYMMDDHHMMSS` timestamp format.
///
/// Absent or malformed values yield `None`, never an error.
fn parse_wayback_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_wayback_timestamp() {
        let ts = parse_wayback_timestamp("20200101123456").expect("valid timestamp");
        assert_eq!(ts.year(), 2020);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 1);
        assert_eq!(ts.hour(), 12);
        assert_eq!(ts.minute(), 34);
        assert_eq!(ts.second(), 56);
    }

    #[test]
    fn test_parse_wayback_timestamp_invalid() {
        assert!(parse_wayback_timestamp("").is_none());
        assert!(parse_wayback_timestamp("not-a-timestamp").is_none());
        assert!(parse_wayback_timestamp("2020").is_none());
    }
}
