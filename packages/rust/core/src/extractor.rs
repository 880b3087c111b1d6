//! LM-backed structured extraction.
//!
//! Converts a page's cleaned Markdown into an ordered sequence of extracted
//! sections via one completion call, and keeps per-run token accounting.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, instrument};

use docgrab_llm::{
    complete_with_retry, ChatMessage, CompletionRequest, LlmClient, RetryPolicy, TokenUsage,
};
use docgrab_shared::{CrawledPage, DocgrabError, ExtractionPayload, ExtractorModelConfig, Result};

/// Concurrent extraction calls in flight at once. Lower than the filter
/// fan-out because extraction prompts are larger and slower.
pub const EXTRACT_CONCURRENCY: usize = 4;

/// Completion cap for an extraction response.
const EXTRACT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Aggregated token usage across a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Completed extraction calls.
    pub call_count: u64,
}

impl UsageTotals {
    fn add(&mut self, usage: TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.call_count += 1;
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// One-call-per-page content extractor.
pub struct Extractor {
    client: Arc<dyn LlmClient>,
    instruction: String,
    temperature: f32,
    retry: RetryPolicy,
    usage: Mutex<UsageTotals>,
}

impl Extractor {
    /// Create an extractor with the given model configuration.
    pub fn new(client: Arc<dyn LlmClient>, config: &ExtractorModelConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            client,
            instruction: config.instruction.clone(),
            temperature: config.temperature,
            retry: RetryPolicy::default(),
            usage: Mutex::new(UsageTotals::default()),
        })
    }

    /// Extract sections from one page.
    ///
    /// A response with no non-empty sections is an error; the extractor never
    /// produces an empty payload.
    #[instrument(skip_all, fields(url = %page.url))]
    pub async fn extract(&self, page: &CrawledPage) -> Result<ExtractionPayload> {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(self.instruction.clone()),
                ChatMessage::user(page.cleaned_html.clone()),
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(EXTRACT_MAX_TOKENS),
        };

        let response = complete_with_retry(self.client.as_ref(), request, self.retry).await?;

        let content = split_sections(&response.content);
        if content.is_empty() {
            return Err(DocgrabError::LlmParse(format!(
                "{}: extraction response contained no sections",
                page.url
            )));
        }

        self.usage
            .lock()
            .expect("usage mutex poisoned")
            .add(response.usage);

        debug!(sections = content.len(), "page extracted");

        Ok(ExtractionPayload {
            url: page.url.clone(),
            content,
            extraction_timestamp: Utc::now(),
        })
    }

    /// Token usage accumulated so far in this run.
    pub fn usage(&self) -> UsageTotals {
        *self.usage.lock().expect("usage mutex poisoned")
    }
}

/// Split a response into non-empty chunks separated by blank lines.
fn split_sections(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
