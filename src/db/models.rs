use serde::{Deserialize, Serialize};

/// A Wikipedia article whose citations have been parsed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WikiPage {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub created_at: String,
}

/// Scrape status of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStatus {
    Pending,
    Scraping,
    Scraped,
    Failed,
    Blocked,
}

impl ReferenceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraping => "scraping",
            Self::Scraped => "scraped",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scraping" => Some(Self::Scraping),
            "scraped" => Some(Self::Scraped),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Whether this status counts as complete for progress purposes.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Scraped | Self::Failed | Self::Blocked)
    }
}

/// One cited source URL belonging to a parsed page.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reference {
    pub id: i64,
    pub page_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub pub_date: Option<String>,
    pub access_date: Option<String>,
    pub suspected_paywall: bool,
    pub status: String,
    pub html_path: Option<String>,
    pub pdf_path: Option<String>,
    pub archive_source: Option<String>,
    pub archive_timestamp: Option<String>,
    pub error_message: Option<String>,
    pub scraped_at: Option<String>,
    pub created_at: String,
}

impl Reference {
    #[must_use]
    pub fn status_enum(&self) -> Option<ReferenceStatus> {
        ReferenceStatus::from_str(&self.status)
    }
}

/// Data for inserting a newly parsed reference.
#[derive(Debug, Clone)]
pub struct NewReference {
    pub url: String,
    pub title: Option<String>,
    pub suspected_paywall: bool,
}

/// Page with aggregate scrape counts for display.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PageSummary {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub created_at: String,
    pub total: i64,
    pub scraped: i64,
}

impl PageSummary {
    /// Percentage of this page's references successfully scraped.
    #[must_use]
    pub fn percent(&self) -> f64 {
        let total = self.total.max(1);
        self.scraped as f64 / total as f64 * 100.0
    }
}
