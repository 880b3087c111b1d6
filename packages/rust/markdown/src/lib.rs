//! HTML-to-Markdown cleaning for crawled pages.
//!
//! Converts a raw HTML page into the cleaned Markdown representation the rest
//! of the pipeline consumes: the main content container is selected, chrome is
//! stripped, the remainder is converted via `htmd`, and a few cleanup passes
//! normalize the result. The cleaned text is what gets hashed for cache
//! lookups and sent to the language models.

mod cleanup;

use scraper::{Html, Selector};
use tracing::debug;

use docgrab_shared::{DocgrabError, Result};

/// Result of cleaning an HTML page.
#[derive(Debug, Clone)]
pub struct CleanResult {
    /// The cleaned Markdown content.
    pub markdown: String,
    /// Page title from the first `<h1>`, or empty.
    pub title: String,
}

/// Content containers tried in priority order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &["article", "main", "[role=\"main\"]", ".content"];

/// Clean an HTML page into Markdown.
pub fn clean(html: &str) -> Result<CleanResult> {
    let doc = Html::parse_document(html);

    let title = extract_title(&doc);
    let content_html = extract_content_html(&doc, html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| DocgrabError::parse(format!("markdown conversion failed: {e}")))?;

    let markdown = cleanup::run_pipeline(&raw_markdown);

    debug!(
        raw_len = raw_markdown.len(),
        final_len = markdown.len(),
        "cleaned page"
    );

    Ok(CleanResult { markdown, title })
}

/// Extract the main content HTML, stripping surrounding chrome.
fn extract_content_html(doc: &Html, raw: &str) -> String {
    for sel_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    raw.to_string()
}

/// Extract the page title from the first `<h1>`.
fn extract_title(doc: &Html) -> String {
    let h1_sel = Selector::parse("h1").expect("valid selector");
    doc.select(&h1_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}
