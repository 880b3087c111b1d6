//! Bounded, best-first web crawler for documentation sites.
//!
//! The crawler starts from a seed URL and expands links in priority order:
//! each discovered link is scored by a keyword-weighted sum of keyword
//! matches and a structural depth score, and the highest-scoring links are
//! fetched first. Depth, page-count, and domain-scope limits bound the crawl.
//! Every yielded page carries the cleaned Markdown rendering produced by
//! `docgrab-markdown`.

pub mod engine;

pub use engine::{url_to_path, CrawlSummary, Crawler};
