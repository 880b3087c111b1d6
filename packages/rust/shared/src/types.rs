//! Core domain types shared across the docgrab crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CrawledPage
// ---------------------------------------------------------------------------

/// A single page yielded by the crawler.
///
/// `cleaned_html` is the cleaner's Markdown rendering of the page with
/// navigation chrome removed; every downstream hash and prompt consumes it.
/// Raw HTML never leaves the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    /// Absolute, normalized page URL.
    pub url: String,
    /// Page title (may be empty when the page has no `<h1>`).
    pub title: String,
    /// Cleaned Markdown content.
    pub cleaned_html: String,
    /// Crawl depth; the seed page is depth 0.
    pub depth: u32,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ExtractionPayload
// ---------------------------------------------------------------------------

/// The extraction result for one page: an ordered sequence of Markdown
/// sections. Never empty for payloads written by the extractor; pages the
/// extractor cannot parse surface as errors instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPayload {
    /// The page URL this extraction belongs to.
    pub url: String,
    /// Ordered, non-empty Markdown sections.
    pub content: Vec<String>,
    /// When the extraction was produced.
    pub extraction_timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PageMetadata
// ---------------------------------------------------------------------------

/// Metadata persisted alongside every extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    /// The page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Crawl depth.
    pub depth: u32,
    /// Whether the relevance filter included this page. `true` when the
    /// filter is absent or disabled.
    pub included: bool,
    /// The filter's explanation for its decision; empty when no filter ran.
    #[serde(default)]
    pub decision_explanation: String,
    /// When the page was crawled.
    pub crawl_timestamp: DateTime<Utc>,
}
