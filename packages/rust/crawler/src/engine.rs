//! Best-first crawl engine with depth, page-count, and scope limits.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docgrab_shared::{CrawlConfig, CrawledPage, DocgrabError, Result};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("docgrab/", env!("CARGO_PKG_VERSION"));

/// Concurrent fetches in flight at once.
const FETCH_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// CrawlSummary
// ---------------------------------------------------------------------------

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    /// Number of pages successfully fetched and yielded.
    pub pages_fetched: usize,
    /// Number of candidate links skipped (dedup, scope, SSRF).
    pub pages_skipped: usize,
    /// Per-page fetch errors (URL, message). Never fatal for the crawl.
    pub errors: Vec<(String, String)>,
    /// Total duration of the crawl.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// A link waiting in the priority frontier.
///
/// Ordered by score descending, then discovery sequence ascending, so the
/// heap pops the best-scored, earliest-discovered link first.
#[derive(Debug)]
struct FrontierEntry {
    score: f64,
    seq: u64,
    url: Url,
    depth: u32,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Best-first web crawler with scope-aware page fetching.
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
    fetch_concurrency: usize,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DocgrabError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            fetch_concurrency: FETCH_CONCURRENCY,
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs (locally served docs, tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Serialize fetches (for tests that assert strict priority order).
    #[cfg(test)]
    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    /// Crawl starting from `seed`, returning a summary and the yielded pages
    /// in yield order.
    #[instrument(skip_all, fields(seed = %seed))]
    pub async fn crawl(&self, seed: &Url) -> Result<(CrawlSummary, Vec<CrawledPage>)> {
        let start_time = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: BinaryHeap<FrontierEntry> = BinaryHeap::new();
        let mut seq: u64 = 0;

        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();
        let mut pages_skipped: usize = 0;

        frontier.push(FrontierEntry {
            score: f64::INFINITY,
            seq,
            url: seed.clone(),
            depth: 0,
        });

        info!(
            max_depth = self.config.max_depth,
            max_pages = self.config.max_pages,
            keywords = self.config.keywords.len(),
            "starting crawl"
        );

        while !frontier.is_empty() && pages.len() < self.config.max_pages {
            // Drain the best candidates, up to the remaining page budget.
            let budget = (self.config.max_pages - pages.len()).min(self.fetch_concurrency);
            let mut batch: Vec<(Url, u32)> = Vec::new();

            while batch.len() < budget {
                let Some(entry) = frontier.pop() else { break };

                let normalized = normalize_url(&entry.url);
                if !visited.insert(normalized) {
                    pages_skipped += 1;
                    continue;
                }

                if !self.in_scope(seed, &entry.url) {
                    debug!(url = %entry.url, "out of scope, skipping");
                    pages_skipped += 1;
                    continue;
                }

                if !self.allow_localhost && is_restricted_target(&entry.url) {
                    warn!(url = %entry.url, "restricted address, skipping");
                    pages_skipped += 1;
                    continue;
                }

                batch.push((entry.url, entry.depth));
            }

            if batch.is_empty() {
                continue;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for (url, depth) in batch {
                let client = self.client.clone();
                let sem = semaphore.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    let fetched = fetch_page(&client, &url, depth).await;
                    (url, depth, fetched)
                }));
            }

            for handle in handles {
                let (url, depth, fetched) = handle
                    .await
                    .map_err(|e| DocgrabError::Network(format!("fetch task failed: {e}")))?;

                let (page, links) = match fetched {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(%url, error = %e, "page fetch failed");
                        errors.push((url.to_string(), e.to_string()));
                        continue;
                    }
                };

                if pages.len() >= self.config.max_pages {
                    break;
                }

                // Expand links while the child depth stays under the bound.
                let child_depth = depth + 1;
                if child_depth < self.config.max_depth {
                    for (link_url, link_text) in &links {
                        if let Ok(parsed) = Url::parse(link_url) {
                            seq += 1;
                            frontier.push(FrontierEntry {
                                score: self.score_link(link_url, link_text, child_depth),
                                seq,
                                url: parsed,
                                depth: child_depth,
                            });
                        }
                    }
                }

                pages.push(page);
            }
        }

        let summary = CrawlSummary {
            pages_fetched: pages.len(),
            pages_skipped,
            errors,
            duration: start_time.elapsed(),
        };

        info!(
            pages_fetched = summary.pages_fetched,
            pages_skipped = summary.pages_skipped,
            errors = summary.errors.len(),
            duration_ms = summary.duration.as_millis(),
            "crawl completed"
        );

        Ok((summary, pages))
    }

    /// Score a discovered link for frontier ordering.
    ///
    /// With keywords configured, the score is `keyword_weight` times the
    /// fraction of keywords matched (case-insensitive substring over the URL
    /// and anchor text) plus `1 - keyword_weight` times a structural depth
    /// score. Without keywords, the structural score alone applies.
    fn score_link(&self, url: &str, text: &str, depth: u32) -> f64 {
        let structural = 1.0 / (1.0 + depth as f64);

        if self.config.keywords.is_empty() {
            return structural;
        }

        let url_lower = url.to_lowercase();
        let text_lower = text.to_lowercase();
        let matched = self
            .config
            .keywords
            .iter()
            .filter(|kw| {
                let kw = kw.trim().to_lowercase();
                !kw.is_empty() && (url_lower.contains(&kw) || text_lower.contains(&kw))
            })
            .count();

        let keyword_score = matched as f64 / self.config.keywords.len() as f64;
        self.config.keyword_weight * keyword_score
            + (1.0 - self.config.keyword_weight) * structural
    }

    /// Whether a URL is inside the crawl scope.
    fn in_scope(&self, seed: &Url, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if self.config.include_external {
            return true;
        }
        same_registered_domain(seed, url)
    }
}

// ---------------------------------------------------------------------------
// Scope helpers
// ---------------------------------------------------------------------------

/// Compare the registered domains of two URLs.
///
/// Approximated as the last two host labels (`docs.example.com` and
/// `example.com` both register as `example.com`).
fn same_registered_domain(a: &Url, b: &Url) -> bool {
    fn registered(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let labels: Vec<&str> = host.rsplit('.').take(2).collect();
        Some(labels.join("."))
    }

    match (registered(a), registered(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Address restrictions
// ---------------------------------------------------------------------------

/// Hostname suffixes that only resolve on internal networks.
const INTERNAL_HOST_SUFFIXES: &[&str] = &[".local", ".internal", ".lan"];

/// Whether a URL points somewhere a public-web crawl must never reach:
/// non-HTTP schemes, loopback, RFC 1918 and other reserved IPv4 ranges,
/// carrier-grade NAT, and internal-only hostnames.
fn is_restricted_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    let Some(host) = url.host_str() else {
        return true;
    };

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, _, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || (a == 100 && (64..128).contains(&b))
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => {
            host.eq_ignore_ascii_case("localhost")
                || host == "[::1]"
                || INTERNAL_HOST_SUFFIXES.iter().any(|s| host.ends_with(s))
        }
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch a single page, clean it, and extract its links.
async fn fetch_page(
    client: &Client,
    url: &Url,
    depth: u32,
) -> Result<(CrawledPage, Vec<(String, String)>)> {
    debug!(%url, depth, "fetching page");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| DocgrabError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocgrabError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| DocgrabError::Network(format!("{url}: body read failed: {e}")))?;

    let links = {
        let doc = Html::parse_document(&body);
        page_links(&doc, url)
    };

    let cleaned = docgrab_markdown::clean(&body)?;

    let page = CrawledPage {
        url: normalize_url(url),
        title: cleaned.title,
        cleaned_html: cleaned.markdown,
        depth,
        fetched_at: Utc::now(),
    };

    Ok((page, links))
}

/// Collect `(absolute_url, anchor_text)` pairs from every anchor in `doc`.
fn page_links(doc: &Html, base: &Url) -> Vec<(String, String)> {
    let anchor_sel = Selector::parse("a[href]").expect("valid selector");

    doc.select(&anchor_sel)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let target = resolve_link(base, href)?;
            let text = anchor.text().collect::<String>();
            Some((target, text.trim().to_string()))
        })
        .collect()
}

/// Resolve an href into a crawlable absolute URL.
///
/// Same-page anchors, pseudo-scheme links, and unparseable hrefs yield
/// `None`; fragments are dropped from everything else.
fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if let Some((scheme, _)) = href.split_once(':') {
        if matches!(
            scheme.to_ascii_lowercase().as_str(),
            "javascript" | "mailto" | "tel" | "data"
        ) {
            return None;
        }
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

/// Normalize a URL for deduplication and cache keys.
///
/// The `url` crate already lowercases scheme and host and drops default
/// ports; stripping the fragment completes the canonical form.
pub(crate) fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.to_string()
}

/// Convert a URL path to a filesystem-safe relative path.
pub fn url_to_path(url: &Url) -> String {
    let path = url.path();
    let cleaned = path
        .trim_start_matches('/')
        .trim_end_matches('/')
        .trim_end_matches(".html")
        .trim_end_matches(".htm");

    if cleaned.is_empty() {
        "index".to_string()
    } else {
        cleaned.to_string()
    }
}
