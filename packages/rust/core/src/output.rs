//! Output-directory writer.
//!
//! Persists one Markdown file per retained page (named from the sanitized
//! URL path) plus an `index.json` describing every page of the run, so each
//! persisted page is discoverable from the summary.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use docgrab_crawler::url_to_path;
use docgrab_shared::{DocgrabError, Result};

use crate::pipeline::PageReport;

/// One entry in `index.json`.
#[derive(Debug, Serialize)]
pub struct IndexRecord {
    pub url: String,
    pub title: String,
    pub depth: u32,
    pub included: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub decision_explanation: String,
    /// Markdown file name, present for persisted pages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_extracted: Option<DateTime<Utc>>,
}

/// Write Markdown files and the run index into `output_dir`.
pub fn write_outputs(output_dir: &Path, reports: &[PageReport]) -> Result<()> {
    std::fs::create_dir_all(output_dir).map_err(|e| DocgrabError::io(output_dir, e))?;

    let mut taken: HashSet<String> = HashSet::new();
    let mut records: Vec<IndexRecord> = Vec::with_capacity(reports.len());
    let mut written = 0usize;

    for report in reports {
        let mut filename = None;
        let mut last_extracted = None;

        if let Some(payload) = &report.payload {
            let name = unique_filename(&report.url, &mut taken);
            let path = output_dir.join(&name);
            let body = payload.content.join("\n\n");

            std::fs::write(&path, body).map_err(|e| DocgrabError::io(&path, e))?;
            debug!(url = %report.url, file = %name, "wrote page output");

            filename = Some(name);
            last_extracted = Some(payload.extraction_timestamp);
            written += 1;
        }

        records.push(IndexRecord {
            url: report.url.clone(),
            title: report.title.clone(),
            depth: report.depth,
            included: report.included,
            decision_explanation: report.decision_explanation.clone(),
            filename,
            last_extracted,
        });
    }

    let index_path = output_dir.join("index.json");
    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| DocgrabError::parse(format!("index serialization failed: {e}")))?;
    std::fs::write(&index_path, json).map_err(|e| DocgrabError::io(&index_path, e))?;

    info!(
        pages = written,
        index = %index_path.display(),
        "output directory written"
    );

    Ok(())
}

/// Derive a Markdown filename from a URL, unique within this run.
fn unique_filename(url: &str, taken: &mut HashSet<String>) -> String {
    let base = sanitize_url_path(url);

    let mut candidate = format!("{base}.md");
    let mut suffix = 1;
    while !taken.insert(candidate.clone()) {
        suffix += 1;
        candidate = format!("{base}-{suffix}.md");
    }
    candidate
}

/// Sanitize a URL's path into a flat, filesystem-safe name.
fn sanitize_url_path(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => url_to_path(&parsed),
        Err(_) => url.to_string(),
    };

    let sanitized: String = path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}
