//! Run configuration for docgrab.
//!
//! Configuration is loaded once at the process edge (CLI flags merged with
//! environment variables) and passed into the pipeline as plain immutable
//! structs. No module outside [`EnvSettings::load`] reads the environment.

use std::path::PathBuf;

use url::Url;

use crate::error::{DocgrabError, Result};

/// Default maximum crawl depth.
pub const DEFAULT_MAX_DEPTH: u32 = 2;
/// Default maximum number of pages per run.
pub const DEFAULT_MAX_PAGES: usize = 25;
/// Default keyword weight for the best-first scorer.
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.7;
/// Default extraction model.
pub const DEFAULT_EXTRACTOR_PROVIDER: &str = "openai/gpt-4o";
/// Default filtering model.
pub const DEFAULT_FILTER_PROVIDER: &str = "openai/gpt-4o-mini";

// ---------------------------------------------------------------------------
// CrawlConfig
// ---------------------------------------------------------------------------

/// Crawler limits and link-scoring parameters.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum crawl depth; the seed page is depth 0.
    pub max_depth: u32,
    /// Maximum number of pages to yield.
    pub max_pages: usize,
    /// Whether links outside the seed's registered domain are followed.
    pub include_external: bool,
    /// Keywords for relevance scoring of discovered links.
    pub keywords: Vec<String>,
    /// Weight of the keyword score vs. the structural score, in `[0, 1]`.
    pub keyword_weight: f64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            include_external: false,
            keywords: Vec::new(),
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
        }
    }
}

impl CrawlConfig {
    /// Validate the configuration parameters.
    ///
    /// Failures are config errors (run-level fatal), not invocation errors.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth < 1 {
            return Err(DocgrabError::config("max_depth must be at least 1"));
        }
        if self.max_pages < 1 {
            return Err(DocgrabError::config("max_pages must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.keyword_weight) {
            return Err(DocgrabError::config(
                "keyword_weight must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model configs
// ---------------------------------------------------------------------------

/// Configuration for the extraction model.
#[derive(Debug, Clone)]
pub struct ExtractorModelConfig {
    /// Provider/model identifier, e.g. `openai/gpt-4o`.
    pub provider: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Extraction instruction sent as the system message.
    pub instruction: String,
}

impl Default for ExtractorModelConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_EXTRACTOR_PROVIDER.into(),
            temperature: 0.1,
            instruction: generic_extraction_instruction(),
        }
    }
}

impl ExtractorModelConfig {
    /// Validate the configuration parameters.
    ///
    /// Failures are config errors (run-level fatal), not invocation errors.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(DocgrabError::config("extractor provider must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(DocgrabError::config(
                "extractor temperature must be between 0 and 1",
            ));
        }
        if self.instruction.trim().is_empty() {
            return Err(DocgrabError::config(
                "extractor instruction must not be empty",
            ));
        }
        Ok(())
    }
}

/// Configuration for the relevance-filter model.
#[derive(Debug, Clone)]
pub struct FilterModelConfig {
    /// Provider/model identifier.
    pub provider: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for FilterModelConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_FILTER_PROVIDER.into(),
            temperature: 0.0,
        }
    }
}

impl FilterModelConfig {
    /// Validate the configuration parameters.
    ///
    /// Failures are config errors (run-level fatal), not invocation errors.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(DocgrabError::config("filter provider must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(DocgrabError::config(
                "filter temperature must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// The default extraction instruction for API documentation pages.
pub fn generic_extraction_instruction() -> String {
    "Extract the complete API documentation information while preserving its \
original structure and content.

Focus on extracting:
1. All function and method definitions with their complete signatures
2. All parameters, their types, and descriptions
3. Return values and their types
4. Class and object definitions with their properties and methods
5. Code examples and usage patterns
6. Important notes, warnings, and best practices
7. Any authentication or configuration requirements

Format the output as clean markdown with:
- Code blocks for all code examples with appropriate syntax highlighting
- Function/method signatures in their own code blocks
- Clear hierarchical headers for organization
- Tables for parameter descriptions where appropriate
- Preserved original structure and terminology

Exclude only clearly irrelevant elements like:
- Navigation menus and breadcrumbs
- Search bars and version selectors
- Footer content unrelated to the API
- Advertisements or promotional content
- UI elements that don't contribute to understanding the API

The goal is to create a comprehensive, well-structured representation of the \
API that preserves all technical details regardless of the programming \
language or API type."
        .to_string()
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-invocation options for a pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Seed URL to crawl from.
    pub seed_url: Url,
    /// Directory for the human-readable Markdown output.
    pub output_dir: PathBuf,
    /// Root directory for the persistent extraction cache.
    pub cache_dir: PathBuf,
    /// Topic the relevance filter matches pages against.
    pub target_topic: Option<String>,
    /// Whether the relevance filter runs at all.
    pub filtering_enabled: bool,
}

impl RunOptions {
    /// Validate the invariants between options.
    ///
    /// `filtering_enabled` requires a non-empty `target_topic`. This is an
    /// invocation error (usage exit code), unlike the model/crawl config
    /// checks.
    pub fn validate(&self) -> Result<()> {
        let topic_missing = self
            .target_topic
            .as_deref()
            .map_or(true, |t| t.trim().is_empty());
        if self.filtering_enabled && topic_missing {
            return Err(DocgrabError::validation(
                "--target-topic is required when filtering is enabled",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment loading
// ---------------------------------------------------------------------------

/// Settings read from the process environment, exactly once, at the edge.
///
/// A `.env` file in the working directory is honored when present.
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    /// `LLM_PROVIDER` — extraction model override.
    pub llm_provider: Option<String>,
    /// `LLM_TEMPERATURE` — extraction temperature override.
    pub llm_temperature: Option<f32>,
    /// `FILTER_LLM_PROVIDER` — filter model override.
    pub filter_llm_provider: Option<String>,
    /// `FILTER_LLM_TEMPERATURE` — filter temperature override.
    pub filter_llm_temperature: Option<f32>,
    /// `OPENAI_API_KEY` — required before any LM call.
    pub api_key: Option<String>,
    /// `MAX_DEPTH` — crawl depth default.
    pub max_depth: Option<u32>,
    /// `MAX_PAGES` — page count default.
    pub max_pages: Option<usize>,
    /// `INCLUDE_EXTERNAL` — external link default.
    pub include_external: Option<bool>,
}

impl EnvSettings {
    /// Load settings from the environment (and `.env`, best-effort).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            llm_provider: read_string("LLM_PROVIDER"),
            llm_temperature: read_parsed("LLM_TEMPERATURE")?,
            filter_llm_provider: read_string("FILTER_LLM_PROVIDER"),
            filter_llm_temperature: read_parsed("FILTER_LLM_TEMPERATURE")?,
            api_key: read_string("OPENAI_API_KEY"),
            max_depth: read_parsed("MAX_DEPTH")?,
            max_pages: read_parsed("MAX_PAGES")?,
            include_external: read_bool("INCLUDE_EXTERNAL")?,
        })
    }

    /// Return the API key, or a config error naming the variable.
    pub fn require_api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(DocgrabError::config(
                "OPENAI_API_KEY is not set in the environment or .env file",
            )),
        }
    }
}

fn read_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match read_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| DocgrabError::config(format!("invalid {name} value '{raw}': {e}"))),
    }
}

fn read_bool(name: &str) -> Result<Option<bool>> {
    match read_string(name) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(DocgrabError::config(format!(
                "invalid {name} value '{raw}': expected true or false"
            ))),
        },
    }
}
