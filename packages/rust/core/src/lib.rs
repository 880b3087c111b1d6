//! End-to-end pipeline for docgrab.
//!
//! Composes the crawler, the optional LM relevance filter, the content cache,
//! the LM extractor, and the output writer into one run:
//! crawl → filter → cache-decide → extract → cache-put → persist.

pub mod extractor;
pub mod filter;
pub mod output;
pub mod pipeline;

pub use extractor::{Extractor, UsageTotals};
pub use filter::{FilterVerdict, RelevanceFilter};
pub use pipeline::{
    run_pipeline, CancelToken, LlmClients, PageOutcome, PageReport, PipelineConfig,
    ProgressReporter, RunReport, SilentProgress,
};
