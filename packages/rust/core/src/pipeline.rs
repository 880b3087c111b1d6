//! End-to-end run orchestration.
//!
//! Per-page flow: `FETCHED → (filter verdict) → (cache decide) → extract →
//! cache put → persisted`. Excluded pages stop at the verdict, cache hits are
//! served without an extractor call, and failed extractions never touch the
//! cache. The final report preserves the crawler's yield order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use docgrab_cache::{CacheDecision, CacheStats, ContentCache};
use docgrab_crawler::Crawler;
use docgrab_llm::LlmClient;
use docgrab_shared::{
    CrawlConfig, CrawledPage, DocgrabError, ExtractionPayload, ExtractorModelConfig,
    FilterModelConfig, PageMetadata, Result, RunOptions,
};

use crate::extractor::{Extractor, UsageTotals, EXTRACT_CONCURRENCY};
use crate::filter::{FilterVerdict, RelevanceFilter};
use crate::output;

/// Overall deadline for one page's extraction and cache work.
const PAGE_DEADLINE: Duration = Duration::from_secs(180);

/// How long to wait for each in-flight task after cancellation.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Full configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Crawler limits and scoring.
    pub crawl: CrawlConfig,
    /// Extraction model settings.
    pub extractor_model: ExtractorModelConfig,
    /// Filter model settings; required when filtering is enabled.
    pub filter_model: Option<FilterModelConfig>,
    /// Per-invocation options.
    pub run: RunOptions,
    /// Allow crawling localhost/private addresses (locally served docs).
    pub allow_local_hosts: bool,
}

/// The LM clients a run uses.
#[derive(Clone)]
pub struct LlmClients {
    /// Client for the extraction model.
    pub extractor: Arc<dyn LlmClient>,
    /// Client for the filter model; required when filtering is enabled.
    pub filter: Option<Arc<dyn LlmClient>>,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Run-level cancellation signal.
///
/// Once triggered, the pipeline stops enqueuing new work, waits briefly for
/// in-flight calls, and returns the partial result. Results already persisted
/// to the cache remain valid.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a page finishes processing.
    fn page_done(&self, url: &str, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_done(&self, _url: &str, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Terminal state of one page within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The relevance filter excluded the page.
    Excluded,
    /// Served from cache without an extractor call.
    CacheHit,
    /// Freshly extracted and persisted.
    Extracted,
    /// The extractor failed after retries; nothing was cached.
    ExtractionFailed(String),
    /// Cache write or page deadline failure.
    Failed(String),
    /// The run was cancelled before this page completed.
    Cancelled,
}

/// Per-page record in the run report.
#[derive(Debug, Clone)]
pub struct PageReport {
    pub url: String,
    pub title: String,
    pub depth: u32,
    /// Filter decision (true when the filter is absent or disabled).
    pub included: bool,
    /// Filter explanation; empty when no filter ran.
    pub decision_explanation: String,
    pub outcome: PageOutcome,
    /// The persisted payload, for pages that reached a terminal success.
    pub payload: Option<ExtractionPayload>,
}

/// Summary of a completed (or cancelled) run.
#[derive(Debug)]
pub struct RunReport {
    /// Per-page reports in the crawler's yield order.
    pub pages: Vec<PageReport>,
    pub total_fetched: usize,
    /// Page-level fetch failures reported by the crawler (pages absent from
    /// the yield).
    pub fetch_errors: usize,
    pub filtered_in: usize,
    pub filtered_out: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    /// Extractor token usage for the run.
    pub usage: UsageTotals,
    /// Cache state after the run.
    pub cache_stats: CacheStats,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Validate a pipeline configuration without running it.
///
/// Everything here happens before any fetch: option invariants, crawl
/// bounds, model settings, and the filtering preconditions.
pub fn validate_config(config: &PipelineConfig, clients: &LlmClients) -> Result<()> {
    config.run.validate()?;
    config.crawl.validate()?;
    config.extractor_model.validate()?;

    if config.run.filtering_enabled {
        let filter_model = config.filter_model.as_ref().ok_or_else(|| {
            DocgrabError::config("filtering is enabled but no filter model is configured")
        })?;
        filter_model.validate()?;

        if clients.filter.is_none() {
            return Err(DocgrabError::config(
                "filtering is enabled but no filter client is configured",
            ));
        }
    }

    Ok(())
}

/// Run the full pipeline.
///
/// 1. Validate configuration
/// 2. Open the cache and drop stale index entries
/// 3. Crawl to completion
/// 4. Filter (when enabled)
/// 5. Per included page: cache decide → extract → cache put
/// 6. Write the output directory and assemble the report
#[instrument(skip_all, fields(seed = %config.run.seed_url))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    clients: &LlmClients,
    progress: &dyn ProgressReporter,
    cancel: CancelToken,
) -> Result<RunReport> {
    let start = Instant::now();

    validate_config(config, clients)?;

    // --- Cache ---
    progress.phase("Opening content cache");
    let cache = Arc::new(ContentCache::open(&config.run.cache_dir).await?);
    let stale = cache.reconcile().await?;
    if stale > 0 {
        info!(stale, "dropped stale cache entries");
    }

    // --- Crawl ---
    progress.phase("Crawling documentation");
    let mut crawler = Crawler::new(config.crawl.clone())?;
    if config.allow_local_hosts {
        crawler = crawler.allow_localhost();
    }
    let (crawl_summary, pages) = crawler.crawl(&config.run.seed_url).await?;

    info!(
        fetched = crawl_summary.pages_fetched,
        skipped = crawl_summary.pages_skipped,
        errors = crawl_summary.errors.len(),
        "crawl finished"
    );

    // --- Filter ---
    let verdicts: Vec<FilterVerdict> = if config.run.filtering_enabled && !cancel.is_cancelled() {
        progress.phase("Filtering pages");
        let filter = RelevanceFilter::new(
            clients.filter.clone().expect("validated above"),
            config.filter_model.as_ref().expect("validated above"),
            config.run.target_topic.clone().expect("validated above"),
        )?;
        filter.run(&pages).await
    } else {
        pages
            .iter()
            .map(|_| FilterVerdict {
                included: true,
                explanation: String::new(),
            })
            .collect()
    };

    // --- Extract ---
    progress.phase("Extracting content");
    let extractor = Arc::new(Extractor::new(
        clients.extractor.clone(),
        &config.extractor_model,
    )?);
    let semaphore = Arc::new(Semaphore::new(EXTRACT_CONCURRENCY));

    enum Slot {
        Ready(PageOutcome, Option<ExtractionPayload>),
        Pending(JoinHandle<(PageOutcome, Option<ExtractionPayload>)>),
    }

    let mut slots: Vec<Slot> = Vec::with_capacity(pages.len());

    for (page, verdict) in pages.iter().zip(&verdicts) {
        if !verdict.included {
            slots.push(Slot::Ready(PageOutcome::Excluded, None));
            continue;
        }

        if cancel.is_cancelled() {
            slots.push(Slot::Ready(PageOutcome::Cancelled, None));
            continue;
        }

        match cache.decide(&page.url, &page.cleaned_html).await {
            CacheDecision::Hit => match cache.get_cached(&page.url).await {
                Ok((payload, _metadata)) => {
                    slots.push(Slot::Ready(PageOutcome::CacheHit, Some(payload)));
                }
                Err(e) => {
                    warn!(url = %page.url, error = %e, "cache hit unreadable");
                    slots.push(Slot::Ready(PageOutcome::Failed(e.to_string()), None));
                }
            },
            CacheDecision::Miss(reason) => {
                info!(url = %page.url, ?reason, "extraction needed");
                slots.push(Slot::Pending(spawn_extraction(
                    page.clone(),
                    verdict.clone(),
                    extractor.clone(),
                    cache.clone(),
                    semaphore.clone(),
                    cancel.clone(),
                )));
            }
        }
    }

    // --- Gather in fetch order ---
    let total = pages.len();
    let mut reports: Vec<PageReport> = Vec::with_capacity(total);

    for (idx, (slot, (page, verdict))) in
        slots.into_iter().zip(pages.iter().zip(&verdicts)).enumerate()
    {
        let (outcome, payload) = match slot {
            Slot::Ready(outcome, payload) => (outcome, payload),
            Slot::Pending(mut handle) => {
                if cancel.is_cancelled() {
                    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => (PageOutcome::Failed(format!("task failed: {e}")), None),
                        Err(_) => {
                            handle.abort();
                            (PageOutcome::Cancelled, None)
                        }
                    }
                } else {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => (PageOutcome::Failed(format!("task failed: {e}")), None),
                    }
                }
            }
        };

        progress.page_done(&page.url, idx + 1, total);
        reports.push(PageReport {
            url: page.url.clone(),
            title: page.title.clone(),
            depth: page.depth,
            included: verdict.included,
            decision_explanation: verdict.explanation.clone(),
            outcome,
            payload,
        });
    }

    // --- Persist output ---
    progress.phase("Writing output");
    output::write_outputs(&config.run.output_dir, &reports)?;

    // --- Report ---
    let cache_stats = cache.stats().await;
    let filtered_in = reports.iter().filter(|r| r.included).count();
    let extracted = reports
        .iter()
        .filter(|r| r.outcome == PageOutcome::Extracted)
        .count();
    let extraction_failures = reports
        .iter()
        .filter(|r| matches!(r.outcome, PageOutcome::ExtractionFailed(_)))
        .count();

    let report = RunReport {
        total_fetched: reports.len(),
        fetch_errors: crawl_summary.errors.len(),
        filtered_in,
        filtered_out: reports.len() - filtered_in,
        cache_hits: cache_stats.cache_hits,
        cache_misses: cache_stats.cache_misses,
        extracted,
        extraction_failures,
        usage: extractor.usage(),
        cache_stats,
        duration: start.elapsed(),
        pages: reports,
    };

    info!(
        total_fetched = report.total_fetched,
        filtered_in = report.filtered_in,
        filtered_out = report.filtered_out,
        cache_hits = report.cache_hits,
        cache_misses = report.cache_misses,
        extracted = report.extracted,
        extraction_failures = report.extraction_failures,
        llm_calls = report.usage.call_count,
        total_tokens = report.usage.total_tokens,
        duration_ms = report.duration.as_millis(),
        "run complete"
    );

    Ok(report)
}

/// Spawn one page's extraction + cache write under the pool semaphore and
/// the per-page deadline.
fn spawn_extraction(
    page: CrawledPage,
    verdict: FilterVerdict,
    extractor: Arc<Extractor>,
    cache: Arc<ContentCache>,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
) -> JoinHandle<(PageOutcome, Option<ExtractionPayload>)> {
    tokio::spawn(async move {
        let work = async {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if cancel.is_cancelled() {
                return (PageOutcome::Cancelled, None);
            }

            let payload = match extractor.extract(&page).await {
                Ok(payload) => payload,
                Err(e) => return (PageOutcome::ExtractionFailed(e.to_string()), None),
            };

            let metadata = PageMetadata {
                url: page.url.clone(),
                title: page.title.clone(),
                depth: page.depth,
                included: verdict.included,
                decision_explanation: verdict.explanation.clone(),
                crawl_timestamp: page.fetched_at,
            };
            let hash = ContentCache::content_hash(&page.cleaned_html);

            match cache.put(&page.url, hash, &payload, &metadata).await {
                Ok(()) => (PageOutcome::Extracted, Some(payload)),
                Err(e) => {
                    warn!(url = %page.url, error = %e, "cache write failed");
                    (PageOutcome::Failed(e.to_string()), None)
                }
            }
        };

        match tokio::time::timeout(PAGE_DEADLINE, work).await {
            Ok(result) => result,
            Err(_) => (
                PageOutcome::Failed(format!(
                    "page exceeded {}s processing deadline",
                    PAGE_DEADLINE.as_secs()
                )),
                None,
            ),
        }
    })
}
