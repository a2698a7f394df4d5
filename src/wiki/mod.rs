//! Wikipedia article parsing: page title and citation links.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::constants::ARCHIVAL_USER_AGENT;
use crate::db::NewReference;

/// Domains known to paywall or meter their articles. References pointing at
/// these are flagged so the scraper tries an archived snapshot first.
const PAYWALL_DOMAINS: &[&str] = &[
    "nytimes.com",
    "wsj.com",
    "ft.com",
    "economist.com",
    "washingtonpost.com",
    "bloomberg.com",
    "newyorker.com",
    "thetimes.co.uk",
    "telegraph.co.uk",
    "latimes.com",
];

static WIKIPEDIA_ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[a-z0-9-]+(\.m)?\.wikipedia\.org/wiki/\S+$").expect("Invalid regex")
});

/// Whether a URL looks like a Wikipedia article page.
#[must_use]
pub fn is_wikipedia_article_url(url: &str) -> bool {
    WIKIPEDIA_ARTICLE_RE.is_match(url)
}

/// Result of parsing one article.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// The article's `<title>` text, if present.
    pub title: Option<String>,
    pub references: Vec<NewReference>,
}

/// Fetches Wikipedia articles and extracts their citations.
pub struct WikiParser {
    client: Client,
}

impl WikiParser {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Fetch the article at `url` and extract its citation links.
    ///
    /// # Errors
    ///
    /// Returns an error if the article cannot be fetched.
    pub async fn parse(&self, url: &str) -> Result<ParsedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch Wikipedia article")?
            .error_for_status()
            .context("Wikipedia returned an error status")?;

        let html = response
            .text()
            .await
            .context("Failed to read Wikipedia article body")?;

        Ok(parse_article(&html))
    }
}

/// Extract the page title and citation links from article HTML.
///
/// Citations are `<cite class="citation">` elements; the first absolute
/// `http(s)` link inside each one is taken as the cited source.
#[must_use]
pub fn parse_article(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").expect("Invalid selector");
    let cite_selector = Selector::parse("cite.citation").expect("Invalid selector");
    let link_selector = Selector::parse("a[href]").expect("Invalid selector");

    let title = document.select(&title_selector).next().map(|t| {
        t.text().collect::<String>().trim().to_string()
    });
    let title = title.filter(|t| !t.is_empty());

    let mut references = Vec::new();
    for cite in document.select(&cite_selector) {
        let Some(link) = cite
            .select(&link_selector)
            .find(|a| is_external_link(a.value().attr("href").unwrap_or("")))
        else {
            continue;
        };
        // Selector guarantees href is present.
        let href = link.value().attr("href").unwrap_or("").to_string();

        let text: String = link.text().collect::<String>().trim().to_string();
        let title = if text.is_empty() { href.clone() } else { text };

        references.push(NewReference {
            suspected_paywall: is_suspected_paywall(&href),
            url: href,
            title: Some(title),
        });
    }

    ParsedPage { title, references }
}

/// Absolute http(s) links only; Wikipedia-internal and anchor links are not
/// citable sources.
fn is_external_link(href: &str) -> bool {
    match Url::parse(href) {
        Ok(url) => {
            (url.scheme() == "http" || url.scheme() == "https")
                && !url
                    .host_str()
                    .is_some_and(|h| h == "wikipedia.org" || h.ends_with(".wikipedia.org"))
        }
        Err(_) => false,
    }
}

/// Whether a URL's host is on the known-paywall list.
#[must_use]
pub fn is_suspected_paywall(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    PAYWALL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}
