//! LM-backed relevance filter.
//!
//! For each crawled page the filter asks the configured model for a binary
//! include/exclude decision against the target topic. Decisions that cannot
//! be obtained or parsed fail open: the page is included and the failure is
//! recorded in its decision explanation, so a downstream reader can see why
//! an irrelevant page slipped through.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use docgrab_llm::{
    complete_with_retry, ChatMessage, CompletionRequest, LlmClient, RetryPolicy,
};
use docgrab_shared::{CrawledPage, DocgrabError, FilterModelConfig, Result};

/// Concurrent filter calls in flight at once.
pub const FILTER_CONCURRENCY: usize = 8;

/// Characters of cleaned content included in the analysis prompt.
const CONTENT_SAMPLE_CHARS: usize = 1500;

/// Completion cap for a decision response.
const FILTER_MAX_TOKENS: u32 = 500;

const SYSTEM_PROMPT: &str =
    "You are an expert at analyzing web content for documentation inclusion decisions.";

// ---------------------------------------------------------------------------
// FilterVerdict
// ---------------------------------------------------------------------------

/// The filter's decision for one page.
#[derive(Debug, Clone)]
pub struct FilterVerdict {
    /// Whether the page proceeds to extraction.
    pub included: bool,
    /// The model's explanation, or the failure that forced an include.
    pub explanation: String,
}

// ---------------------------------------------------------------------------
// RelevanceFilter
// ---------------------------------------------------------------------------

/// Binary include/exclude filter for crawled pages.
pub struct RelevanceFilter {
    client: Arc<dyn LlmClient>,
    target_topic: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl RelevanceFilter {
    /// Create a filter for `target_topic`.
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: &FilterModelConfig,
        target_topic: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let target_topic = target_topic.into();
        if target_topic.trim().is_empty() {
            return Err(DocgrabError::validation(
                "filter target topic must not be empty",
            ));
        }

        Ok(Self {
            client,
            target_topic,
            temperature: config.temperature,
            retry: RetryPolicy::default(),
        })
    }

    /// Evaluate all pages concurrently, returning verdicts in input order.
    #[instrument(skip_all, fields(pages = pages.len(), topic = %self.target_topic))]
    pub async fn run(&self, pages: &[CrawledPage]) -> Vec<FilterVerdict> {
        let semaphore = Arc::new(Semaphore::new(FILTER_CONCURRENCY));
        let mut handles = Vec::with_capacity(pages.len());

        for page in pages {
            let sem = semaphore.clone();
            let client = self.client.clone();
            let topic = self.target_topic.clone();
            let temperature = self.temperature;
            let retry = self.retry;
            let page = page.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                evaluate_page(client.as_ref(), &topic, temperature, retry, &page).await
            }));
        }

        let mut verdicts = Vec::with_capacity(handles.len());
        for (handle, page) in handles.into_iter().zip(pages) {
            let verdict = handle.await.unwrap_or_else(|e| FilterVerdict {
                included: true,
                explanation: format!("analysis failed: {e}"),
            });
            debug!(url = %page.url, included = verdict.included, "filter verdict");
            verdicts.push(verdict);
        }

        let included = verdicts.iter().filter(|v| v.included).count();
        info!(
            included,
            excluded = verdicts.len() - included,
            "filtering complete"
        );

        verdicts
    }
}

/// Run one inclusion analysis. Failures of any kind produce an include.
async fn evaluate_page(
    client: &dyn LlmClient,
    topic: &str,
    temperature: f32,
    retry: RetryPolicy,
    page: &CrawledPage,
) -> FilterVerdict {
    let request = CompletionRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(inclusion_prompt(topic, page)),
        ],
        temperature: Some(temperature),
        max_tokens: Some(FILTER_MAX_TOKENS),
    };

    let response = match complete_with_retry(client, request, retry).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %page.url, error = %e, "filter call failed, including page");
            return FilterVerdict {
                included: true,
                explanation: format!("analysis failed: {e}"),
            };
        }
    };

    match parse_decision(&response.content) {
        Ok((included, explanation)) => FilterVerdict {
            included,
            explanation,
        },
        Err(e) => {
            warn!(url = %page.url, error = %e, "filter response unparseable, including page");
            FilterVerdict {
                included: true,
                explanation: e.to_string(),
            }
        }
    }
}

/// Build the inclusion-analysis prompt for one page.
fn inclusion_prompt(topic: &str, page: &CrawledPage) -> String {
    let sample = truncate_chars(&page.cleaned_html, CONTENT_SAMPLE_CHARS);

    format!(
        r#"Analyze this web page and decide whether to INCLUDE or EXCLUDE it for the target topic: "{topic}"

Page Details:
- URL: {url}
- Title: {title}
- Content Sample: {sample}

Make a binary decision based on relevance to the target topic.

Respond in this exact JSON format:
{{
    "decision": "include",
    "explanation": "Brief explanation of why this page should be included or excluded"
}}

The "decision" field must be exactly "include" or "exclude".

Consider factors like:
- Does the content directly address the target topic?
- Are there specific technical details related to the target?
- Is this a navigation page vs. actual documentation content?
- Does the URL path indicate relevance?
- Does the title suggest relevant content?"#,
        url = page.url,
        title = page.title,
    )
}

/// Parse the first JSON object out of a decision response.
fn parse_decision(response_text: &str) -> Result<(bool, String)> {
    let parse_error = || {
        DocgrabError::LlmParse(format!(
            "parse error: could not extract an include/exclude decision from: {response_text}"
        ))
    };

    let start = response_text.find('{').ok_or_else(parse_error)?;
    let end = response_text.rfind('}').ok_or_else(parse_error)?;
    if end < start {
        return Err(parse_error());
    }

    let value: serde_json::Value =
        serde_json::from_str(&response_text[start..=end]).map_err(|_| parse_error())?;

    let included = match value.get("decision").and_then(|d| d.as_str()) {
        Some("include") => true,
        Some("exclude") => false,
        _ => return Err(parse_error()),
    };

    let explanation = value
        .get("explanation")
        .and_then(|e| e.as_str())
        .unwrap_or("No explanation provided")
        .to_string();

    Ok((included, explanation))
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(cleaned: &str) -> CrawledPage {
        CrawledPage {
            url: "https://docs.example.com/sdk".into(),
            title: "SDK Guide".into(),
            cleaned_html: cleaned.into(),
            depth: 1,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn parses_include_decision() {
        let (included, explanation) =
            parse_decision(r#"{"decision": "include", "explanation": "Covers the SDK."}"#)
                .unwrap();
        assert!(included);
        assert_eq!(explanation, "Covers the SDK.");
    }

    #[test]
    fn parses_exclude_decision() {
        let (included, _) =
            parse_decision(r#"{"decision": "exclude", "explanation": "Marketing page."}"#)
                .unwrap();
        assert!(!included);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = "Sure! Here is my answer:\n{\"decision\": \"include\", \"explanation\": \"ok\"}\nDone.";
        let (included, _) = parse_decision(text).unwrap();
        assert!(included);
    }

    #[test]
    fn bare_text_is_a_parse_error() {
        let err = parse_decision("maybe").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("parse error"));
        assert!(msg.contains("maybe"));
    }

    #[test]
    fn unexpected_decision_value_is_a_parse_error() {
        let err = parse_decision(r#"{"decision": "perhaps", "explanation": "?"}"#).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn missing_explanation_gets_placeholder() {
        let (_, explanation) = parse_decision(r#"{"decision": "include"}"#).unwrap();
        assert_eq!(explanation, "No explanation provided");
    }

    #[test]
    fn prompt_sample_is_bounded_and_deterministic() {
        let long = "x".repeat(5000);
        let p = page(&long);
        let a = inclusion_prompt("Python SDK documentation", &p);
        let b = inclusion_prompt("Python SDK documentation", &p);
        assert_eq!(a, b);
        assert!(a.len() < 4000);
        assert!(a.contains("Python SDK documentation"));
        assert!(a.contains(&p.url));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld".repeat(300);
        let truncated = truncate_chars(&text, CONTENT_SAMPLE_CHARS);
        assert_eq!(truncated.chars().count(), CONTENT_SAMPLE_CHARS);
    }
}
