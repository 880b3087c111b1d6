//! End-to-end pipeline tests against mock documentation and LM servers.

use std::sync::Arc;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use docgrab_core::{run_pipeline, CancelToken, LlmClients, PageOutcome, PipelineConfig, SilentProgress};
use docgrab_llm::OpenAiClient;
use docgrab_shared::{CrawlConfig, ExtractorModelConfig, FilterModelConfig, RunOptions};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn page_html(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{l}\">{l}</a>"))
        .collect();
    format!("<html><body><main><h1>{title}</h1><p>{body}</p>{anchors}</main></body></html>")
}

async fn mount_page(server: &MockServer, route: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

/// A three-page docs site: / → /alpha, /beta.
async fn mount_three_page_site(server: &MockServer, alpha_body: &str) {
    mount_page(
        server,
        "/",
        page_html("Overview", "Start here.", &["/alpha", "/beta"]),
    )
    .await;
    mount_page(server, "/alpha", page_html("Alpha", alpha_body, &[])).await;
    mount_page(server, "/beta", page_html("Beta", "Beta details.", &[])).await;
}

fn extraction_response() -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {
            "role": "assistant",
            "content": "# Extracted Documentation\n\nThe API exposes one method."
        }}],
        "usage": {"prompt_tokens": 200, "completion_tokens": 30, "total_tokens": 230}
    })
}

async fn mount_extractor(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(extraction_response()))
        .mount(server)
        .await;
}

/// Mount a filter LM that excludes pages whose prompt mentions any of
/// `exclude_markers` and includes the rest.
async fn mount_filter(server: &MockServer, exclude_markers: Vec<String>) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(move |req: &Request| {
            let body = String::from_utf8_lossy(&req.body).to_string();
            let excluded = exclude_markers.iter().any(|m| body.contains(m.as_str()));
            let decision = if excluded { "exclude" } else { "include" };
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": format!(
                        "{{\"decision\": \"{decision}\", \"explanation\": \"Matched against the target topic.\"}}"
                    )
                }}],
                "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60}
            }))
        })
        .mount(server)
        .await;
}

async fn llm_call_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|reqs| reqs.len())
        .unwrap_or(0)
}

struct TestRun {
    config: PipelineConfig,
    clients: LlmClients,
    _output: tempfile::TempDir,
    _cache: tempfile::TempDir,
}

impl TestRun {
    fn new(
        site: &MockServer,
        extractor_llm: &MockServer,
        filter_llm: Option<&MockServer>,
        target_topic: Option<&str>,
    ) -> Self {
        let output = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let config = PipelineConfig {
            crawl: CrawlConfig {
                max_depth: 2,
                max_pages: 25,
                ..Default::default()
            },
            extractor_model: ExtractorModelConfig::default(),
            filter_model: filter_llm.map(|_| FilterModelConfig::default()),
            run: RunOptions {
                seed_url: Url::parse(&site.uri()).unwrap(),
                output_dir: output.path().to_path_buf(),
                cache_dir: cache.path().to_path_buf(),
                target_topic: target_topic.map(String::from),
                filtering_enabled: filter_llm.is_some(),
            },
            allow_local_hosts: true,
        };

        let clients = LlmClients {
            extractor: Arc::new(
                OpenAiClient::new("openai/gpt-4o", "test-key")
                    .unwrap()
                    .with_base_url(extractor_llm.uri()),
            ),
            filter: filter_llm.map(|server| {
                Arc::new(
                    OpenAiClient::new("openai/gpt-4o-mini", "test-key")
                        .unwrap()
                        .with_base_url(server.uri()),
                ) as Arc<dyn docgrab_llm::LlmClient>
            }),
        };

        Self {
            config,
            clients,
            _output: output,
            _cache: cache,
        }
    }

    async fn run(&self) -> docgrab_core::RunReport {
        run_pipeline(&self.config, &self.clients, &SilentProgress, CancelToken::new())
            .await
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_run_without_filter_extracts_every_page() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    mount_three_page_site(&site, "Alpha details.").await;
    mount_extractor(&extractor_llm).await;

    let harness = TestRun::new(&site, &extractor_llm, None, None);
    let report = harness.run().await;

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.cache_misses, 3);
    assert_eq!(report.extracted, 3);
    assert_eq!(report.extraction_failures, 0);
    assert_eq!(report.usage.call_count, 3);
    assert_eq!(llm_call_count(&extractor_llm).await, 3);

    // Output: one markdown file per page plus the index.
    let index_path = harness.config.run.output_dir.join("index.json");
    let index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
    assert_eq!(index.as_array().unwrap().len(), 3);

    let md_files = std::fs::read_dir(&harness.config.run.output_dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|ext| ext == "md")
        })
        .count();
    assert_eq!(md_files, 3);
}

#[tokio::test]
async fn warm_run_serves_everything_from_cache() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    mount_three_page_site(&site, "Alpha details.").await;
    mount_extractor(&extractor_llm).await;

    let harness = TestRun::new(&site, &extractor_llm, None, None);
    harness.run().await;
    assert_eq!(llm_call_count(&extractor_llm).await, 3);

    let index_path = harness.config.run.cache_dir.join("content_index.json");
    let index_before = std::fs::read_to_string(&index_path).unwrap();

    let report = harness.run().await;

    // No new extractor calls; every page came from cache.
    assert_eq!(llm_call_count(&extractor_llm).await, 3);
    assert_eq!(report.cache_hits, 3);
    assert_eq!(report.cache_misses, 0);
    assert_eq!(report.extracted, 0);
    assert!(report
        .pages
        .iter()
        .all(|p| p.outcome == PageOutcome::CacheHit));

    // The warm run never rewrites the index.
    let index_after = std::fs::read_to_string(&index_path).unwrap();
    assert_eq!(index_before, index_after);

    // Outputs are still written from cached payloads.
    let md_files = std::fs::read_dir(&harness.config.run.output_dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|ext| ext == "md")
        })
        .count();
    assert_eq!(md_files, 3);
}

#[tokio::test]
async fn changed_page_is_the_only_one_re_extracted() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    mount_three_page_site(&site, "Alpha details.").await;
    mount_extractor(&extractor_llm).await;

    let harness = TestRun::new(&site, &extractor_llm, None, None);
    harness.run().await;
    assert_eq!(llm_call_count(&extractor_llm).await, 3);

    // One character of /alpha changes upstream.
    site.reset().await;
    mount_three_page_site(&site, "Alpha details!").await;

    let report = harness.run().await;

    assert_eq!(llm_call_count(&extractor_llm).await, 4);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(report.cache_misses, 1);
    assert_eq!(report.extracted, 1);

    let changed: Vec<_> = report
        .pages
        .iter()
        .filter(|p| p.outcome == PageOutcome::Extracted)
        .collect();
    assert_eq!(changed.len(), 1);
    assert!(changed[0].url.ends_with("/alpha"));
}

#[tokio::test]
async fn filter_splits_pages_and_only_included_ones_are_extracted() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    let filter_llm = MockServer::start().await;

    mount_page(
        &site,
        "/",
        page_html("SDK Docs", "Start here.", &["/guide", "/pricing", "/blog"]),
    )
    .await;
    mount_page(&site, "/guide", page_html("Guide", "SDK usage.", &[])).await;
    mount_page(&site, "/pricing", page_html("Pricing", "Plans.", &[])).await;
    mount_page(&site, "/blog", page_html("Blog", "News.", &[])).await;

    mount_extractor(&extractor_llm).await;
    mount_filter(&filter_llm, vec!["/pricing".into(), "/blog".into()]).await;

    let harness = TestRun::new(
        &site,
        &extractor_llm,
        Some(&filter_llm),
        Some("Python SDK documentation"),
    );
    let report = harness.run().await;

    assert_eq!(report.total_fetched, 4);
    assert_eq!(llm_call_count(&filter_llm).await, 4);
    assert_eq!(llm_call_count(&extractor_llm).await, 2);
    assert_eq!(report.filtered_in, 2);
    assert_eq!(report.filtered_out, 2);
    assert_eq!(report.extracted, 2);

    let excluded: Vec<_> = report
        .pages
        .iter()
        .filter(|p| p.outcome == PageOutcome::Excluded)
        .collect();
    assert_eq!(excluded.len(), 2);
    for page in excluded {
        assert!(!page.included);
        assert!(!page.decision_explanation.is_empty());
        assert!(page.payload.is_none());
    }

    // Excluded pages are still recorded in the run index.
    let index_path = harness.config.run.output_dir.join("index.json");
    let index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
    assert_eq!(index.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn unparseable_filter_reply_fails_open() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    let filter_llm = MockServer::start().await;

    mount_page(&site, "/", page_html("Docs", "Content.", &[])).await;
    mount_extractor(&extractor_llm).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "maybe"}}]
        })))
        .mount(&filter_llm)
        .await;

    let harness = TestRun::new(
        &site,
        &extractor_llm,
        Some(&filter_llm),
        Some("Python SDK documentation"),
    );
    let report = harness.run().await;

    assert_eq!(report.filtered_in, 1);
    let page = &report.pages[0];
    assert!(page.included);
    assert!(page.decision_explanation.contains("parse error"));
    assert!(page.decision_explanation.contains("maybe"));
    // Fail-open pages proceed to extraction.
    assert_eq!(report.extracted, 1);
}

#[tokio::test]
async fn disabled_filter_issues_no_filter_calls() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    let filter_llm = MockServer::start().await;

    mount_page(&site, "/", page_html("Docs", "Content.", &[])).await;
    mount_extractor(&extractor_llm).await;
    mount_filter(&filter_llm, vec![]).await;

    // Filter server exists but filtering is disabled.
    let mut harness = TestRun::new(&site, &extractor_llm, None, None);
    harness.clients.filter = Some(Arc::new(
        OpenAiClient::new("openai/gpt-4o-mini", "test-key")
            .unwrap()
            .with_base_url(filter_llm.uri()),
    ));
    let report = harness.run().await;

    assert_eq!(llm_call_count(&filter_llm).await, 0);
    assert_eq!(report.filtered_in, 1);
    assert!(report.pages[0].decision_explanation.is_empty());
}

#[tokio::test]
async fn extraction_failure_marks_page_without_cache_write() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;

    mount_page(&site, "/", page_html("Docs", "Content.", &[])).await;

    // The extractor model always errors.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&extractor_llm)
        .await;

    let harness = TestRun::new(&site, &extractor_llm, None, None);
    let report = harness.run().await;

    assert_eq!(report.extracted, 0);
    assert_eq!(report.extraction_failures, 1);
    assert!(matches!(
        report.pages[0].outcome,
        PageOutcome::ExtractionFailed(_)
    ));
    // Nothing was cached for the failed page.
    assert_eq!(report.cache_stats.total_urls, 0);

    // The failure was retried twice before giving up.
    assert_eq!(llm_call_count(&extractor_llm).await, 3);
}

#[tokio::test]
async fn cancelled_run_returns_partial_report() {
    let site = MockServer::start().await;
    let extractor_llm = MockServer::start().await;
    mount_three_page_site(&site, "Alpha details.").await;
    mount_extractor(&extractor_llm).await;

    let harness = TestRun::new(&site, &extractor_llm, None, None);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = run_pipeline(&harness.config, &harness.clients, &SilentProgress, cancel)
        .await
        .unwrap();

    assert_eq!(report.total_fetched, 3);
    assert_eq!(llm_call_count(&extractor_llm).await, 0);
    assert!(report
        .pages
        .iter()
        .all(|p| p.outcome == PageOutcome::Cancelled));
}
