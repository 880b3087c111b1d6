//! Shared types, error model, and configuration for docgrab.
//!
//! This crate is the foundation depended on by all other docgrab crates.
//! It provides:
//! - [`DocgrabError`] — the unified error type
//! - Domain types ([`CrawledPage`], [`ExtractionPayload`], [`PageMetadata`])
//! - Configuration structs and the single environment loader

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    generic_extraction_instruction, CrawlConfig, EnvSettings, ExtractorModelConfig,
    FilterModelConfig, RunOptions, DEFAULT_EXTRACTOR_PROVIDER, DEFAULT_FILTER_PROVIDER,
    DEFAULT_KEYWORD_WEIGHT, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGES,
};
pub use error::{DocgrabError, Result};
pub use types::{CrawledPage, ExtractionPayload, PageMetadata};
