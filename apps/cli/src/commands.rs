//! CLI definition, tracing setup, and run orchestration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use docgrab_cache::DEFAULT_CACHE_DIR;
use docgrab_core::{
    run_pipeline, CancelToken, LlmClients, PipelineConfig, ProgressReporter, RunReport,
};
use docgrab_llm::{LlmClient, OpenAiClient};
use docgrab_shared::{
    CrawlConfig, DocgrabError, EnvSettings, ExtractorModelConfig, FilterModelConfig, Result,
    RunOptions, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGES,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docgrab — turn documentation sites into extracted, cached Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "docgrab",
    version,
    about = "Crawl a documentation site and extract structured Markdown with an LM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// URL of the documentation to crawl.
    pub url: String,

    /// Directory to save extracted pages in.
    #[arg(long, default_value = "output")]
    pub output_dir: String,

    /// Root directory for the persistent extraction cache.
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: String,

    /// Comma-separated keywords for crawl priority scoring.
    #[arg(long)]
    pub keywords: Option<String>,

    /// Maximum crawl depth (seed is depth 0). Falls back to MAX_DEPTH.
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Maximum number of pages to crawl. Falls back to MAX_PAGES.
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Follow links outside the seed's domain. Falls back to INCLUDE_EXTERNAL.
    #[arg(long)]
    pub include_external: bool,

    /// Topic the relevance filter matches pages against.
    #[arg(long)]
    pub target_topic: Option<String>,

    /// Enable the LM relevance filter (requires --target-topic).
    #[arg(long)]
    pub enable_filtering: bool,

    /// Allow crawling localhost/private addresses (locally served docs).
    #[arg(long)]
    pub allow_local: bool,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "docgrab=info",
        1 => "docgrab=debug",
        _ => "docgrab=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Execute the crawl-and-extract run described by the CLI arguments.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let env = EnvSettings::load()?;
    let config = build_config(&cli, &env)?;

    // Invariants first (exit 2), then the API key (exit 1), all before any
    // network activity.
    config.run.validate()?;
    let api_key = env.require_api_key()?;

    let clients = build_clients(&config, &api_key)?;

    info!(
        url = %config.run.seed_url,
        max_depth = config.crawl.max_depth,
        max_pages = config.crawl.max_pages,
        filtering = config.run.filtering_enabled,
        "starting run"
    );

    // Ctrl-C triggers a drain-and-return with partial results.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupt received; finishing in-flight work...");
                cancel.cancel();
            }
        });
    }

    let reporter = CliProgress::new();
    let report = run_pipeline(&config, &clients, &reporter, cancel).await?;
    reporter.finish();

    print_summary(&report);
    Ok(())
}

/// Merge CLI flags with environment settings into a pipeline config.
fn build_config(cli: &Cli, env: &EnvSettings) -> Result<PipelineConfig> {
    let seed_url = Url::parse(&cli.url)
        .map_err(|e| DocgrabError::validation(format!("invalid URL '{}': {e}", cli.url)))?;

    let keywords = cli
        .keywords
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let crawl = CrawlConfig {
        max_depth: cli.max_depth.or(env.max_depth).unwrap_or(DEFAULT_MAX_DEPTH),
        max_pages: cli.max_pages.or(env.max_pages).unwrap_or(DEFAULT_MAX_PAGES),
        include_external: cli.include_external || env.include_external.unwrap_or(false),
        keywords,
        ..Default::default()
    };

    let mut extractor_model = ExtractorModelConfig::default();
    if let Some(provider) = &env.llm_provider {
        extractor_model.provider = provider.clone();
    }
    if let Some(temperature) = env.llm_temperature {
        extractor_model.temperature = temperature;
    }

    let mut filter_model = FilterModelConfig::default();
    if let Some(provider) = &env.filter_llm_provider {
        filter_model.provider = provider.clone();
    }
    if let Some(temperature) = env.filter_llm_temperature {
        filter_model.temperature = temperature;
    }

    Ok(PipelineConfig {
        crawl,
        extractor_model,
        filter_model: Some(filter_model),
        run: RunOptions {
            seed_url,
            output_dir: PathBuf::from(&cli.output_dir),
            cache_dir: PathBuf::from(&cli.cache_dir),
            target_topic: cli.target_topic.clone(),
            filtering_enabled: cli.enable_filtering,
        },
        allow_local_hosts: cli.allow_local,
    })
}

/// Construct the LM clients for the run.
fn build_clients(config: &PipelineConfig, api_key: &str) -> Result<LlmClients> {
    let extractor: Arc<dyn LlmClient> =
        Arc::new(OpenAiClient::new(&config.extractor_model.provider, api_key)?);

    let filter: Option<Arc<dyn LlmClient>> = if config.run.filtering_enabled {
        let provider = &config
            .filter_model
            .as_ref()
            .expect("filter model defaulted in build_config")
            .provider;
        Some(Arc::new(OpenAiClient::new(provider, api_key)?))
    } else {
        None
    };

    Ok(LlmClients { extractor, filter })
}

/// Print the run summary to stdout.
fn print_summary(report: &RunReport) {
    println!();
    println!("  Run complete");
    println!(
        "  Pages fetched:       {} ({} fetch errors)",
        report.total_fetched, report.fetch_errors
    );
    println!(
        "  Filter decisions:    {} in / {} out",
        report.filtered_in, report.filtered_out
    );
    println!(
        "  Cache:               {} hits / {} misses ({} URLs indexed)",
        report.cache_hits, report.cache_misses, report.cache_stats.total_urls
    );
    println!(
        "  Extracted:           {} ok / {} failed",
        report.extracted, report.extraction_failures
    );
    println!(
        "  LM usage:            {} calls, {} prompt + {} completion = {} tokens",
        report.usage.call_count,
        report.usage.prompt_tokens,
        report.usage.completion_tokens,
        report.usage.total_tokens
    );
    println!("  Time:                {:.1}s", report.duration.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner-based progress reporter.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_done(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Processing [{current}/{total}] {url}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    fn env() -> EnvSettings {
        EnvSettings::default()
    }

    #[test]
    fn defaults_match_contract() {
        let cli = parse(&["docgrab", "https://docs.example.com/"]);
        let config = build_config(&cli, &env()).unwrap();

        assert_eq!(config.crawl.max_depth, 2);
        assert_eq!(config.crawl.max_pages, 25);
        assert!(!config.crawl.include_external);
        assert_eq!(config.run.output_dir, PathBuf::from("output"));
        assert_eq!(config.run.cache_dir, PathBuf::from("extracted-docs"));
        assert!(!config.run.filtering_enabled);
    }

    #[test]
    fn no_arguments_is_a_usage_error() {
        // clap reports missing positional arguments with exit code 2.
        let err = Cli::try_parse_from(["docgrab"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn keywords_are_split_and_trimmed() {
        let cli = parse(&[
            "docgrab",
            "https://docs.example.com/",
            "--keywords",
            "async, config ,,crawl",
        ]);
        let config = build_config(&cli, &env()).unwrap();
        assert_eq!(config.crawl.keywords, vec!["async", "config", "crawl"]);
    }

    #[test]
    fn env_fills_in_missing_flags() {
        let cli = parse(&["docgrab", "https://docs.example.com/"]);
        let env = EnvSettings {
            max_depth: Some(4),
            max_pages: Some(50),
            include_external: Some(true),
            llm_provider: Some("openai/gpt-4.1".into()),
            llm_temperature: Some(0.3),
            ..Default::default()
        };

        let config = build_config(&cli, &env).unwrap();
        assert_eq!(config.crawl.max_depth, 4);
        assert_eq!(config.crawl.max_pages, 50);
        assert!(config.crawl.include_external);
        assert_eq!(config.extractor_model.provider, "openai/gpt-4.1");
        assert!((config.extractor_model.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn flags_override_env() {
        let cli = parse(&[
            "docgrab",
            "https://docs.example.com/",
            "--max-depth",
            "1",
            "--max-pages",
            "3",
        ]);
        let env = EnvSettings {
            max_depth: Some(4),
            max_pages: Some(50),
            ..Default::default()
        };

        let config = build_config(&cli, &env).unwrap();
        assert_eq!(config.crawl.max_depth, 1);
        assert_eq!(config.crawl.max_pages, 3);
    }

    #[test]
    fn filtering_without_topic_is_a_validation_error() {
        let cli = parse(&["docgrab", "https://docs.example.com/", "--enable-filtering"]);
        let config = build_config(&cli, &env()).unwrap();
        let err = config.run.validate().unwrap_err();

        assert!(matches!(err, DocgrabError::Validation { .. }));
        assert!(err.to_string().contains("--target-topic"));
    }

    #[test]
    fn filtering_with_topic_validates() {
        let cli = parse(&[
            "docgrab",
            "https://docs.example.com/",
            "--enable-filtering",
            "--target-topic",
            "Python SDK documentation",
        ]);
        let config = build_config(&cli, &env()).unwrap();
        assert!(config.run.validate().is_ok());
    }

    #[test]
    fn invalid_url_is_a_validation_error() {
        let cli = parse(&["docgrab", "not a url"]);
        let err = build_config(&cli, &env()).unwrap_err();
        assert!(matches!(err, DocgrabError::Validation { .. }));
    }
}
