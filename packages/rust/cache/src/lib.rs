//! Content-addressed extraction cache.
//!
//! Persists the mapping URL → (content hash, extraction, metadata) so that
//! unchanged pages never hit the language model twice. Layout under the cache
//! root:
//!
//! ```text
//! extracted-docs/
//! ├── content_index.json          # url → index entry
//! ├── extractions/<url_hash>.json
//! └── metadata/<url_hash>_meta.json
//! ```
//!
//! The index is owned by one process at a time; the in-memory copy sits
//! behind a mutex and the on-disk copy is rewritten atomically (temp file,
//! fsync, rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use docgrab_shared::{DocgrabError, ExtractionPayload, PageMetadata, Result};

/// Default cache root directory name.
pub const DEFAULT_CACHE_DIR: &str = "extracted-docs";

/// Index file name within the cache root.
const INDEX_FILE: &str = "content_index.json";

/// Hex characters of SHA-256(url) used for cache filenames.
const URL_HASH_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Index entry
// ---------------------------------------------------------------------------

/// One record in `content_index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Lowercase hex SHA-256 of the page's cleaned content.
    pub content_hash: String,
    /// Relative path of the extraction file.
    pub extraction_file: String,
    /// Relative path of the metadata file.
    pub metadata_file: String,
    /// URL hash used in filenames (12 hex chars, plus a collision suffix).
    pub url_hash: String,
    /// When the extraction was last written.
    pub last_extracted: DateTime<Utc>,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The URL is indexed and its content hash is unchanged.
    Hit,
    /// The page must go through extraction.
    Miss(MissReason),
}

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// The URL has never been extracted.
    NewUrl,
    /// The URL is indexed but its content changed.
    ContentChanged,
}

/// Cache statistics for run reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// URLs present in the index.
    pub total_urls: usize,
    /// Extraction files that exist on disk.
    pub extraction_files: usize,
    /// Metadata files that exist on disk.
    pub metadata_files: usize,
    /// Lookup hits since the cache was opened.
    pub cache_hits: usize,
    /// Lookup misses since the cache was opened.
    pub cache_misses: usize,
}

// ---------------------------------------------------------------------------
// ContentCache
// ---------------------------------------------------------------------------

struct CacheState {
    index: HashMap<String, IndexEntry>,
    hits: usize,
    misses: usize,
}

/// Content-addressed store for extraction results.
pub struct ContentCache {
    base_dir: PathBuf,
    state: Mutex<CacheState>,
}

impl ContentCache {
    /// Open (or create) a cache rooted at `base_dir`.
    ///
    /// A missing index file is an empty index. A malformed index file is
    /// recoverable: the cache starts empty and the old record files remain
    /// as orphans until [`ContentCache::reconcile`] runs against a later
    /// index state.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();

        for sub in ["extractions", "metadata"] {
            let dir = base_dir.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DocgrabError::io(&dir, e))?;
        }

        let index = load_index(&base_dir.join(INDEX_FILE)).await?;
        info!(
            path = %base_dir.display(),
            entries = index.len(),
            "content cache opened"
        );

        Ok(Self {
            base_dir,
            state: Mutex::new(CacheState {
                index,
                hits: 0,
                misses: 0,
            }),
        })
    }

    /// Compute the lowercase hex SHA-256 of cleaned content.
    pub fn content_hash(cleaned_html: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(cleaned_html.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Decide whether a page can be served from cache.
    ///
    /// Hit iff the URL is indexed and the stored hash equals the hash of
    /// `cleaned_html`. Updates the hit/miss counters.
    pub async fn decide(&self, url: &str, cleaned_html: &str) -> CacheDecision {
        let new_hash = Self::content_hash(cleaned_html);
        let mut state = self.state.lock().await;

        let decision = match state.index.get(url) {
            None => CacheDecision::Miss(MissReason::NewUrl),
            Some(entry) if entry.content_hash == new_hash => CacheDecision::Hit,
            Some(_) => CacheDecision::Miss(MissReason::ContentChanged),
        };

        match decision {
            CacheDecision::Hit => state.hits += 1,
            CacheDecision::Miss(_) => state.misses += 1,
        }

        debug!(url, ?decision, "cache decision");
        decision
    }

    /// Read the cached extraction and metadata for a URL.
    ///
    /// Succeeds whenever the last [`ContentCache::decide`] for the URL
    /// returned a hit.
    pub async fn get_cached(&self, url: &str) -> Result<(ExtractionPayload, PageMetadata)> {
        let entry = {
            let state = self.state.lock().await;
            state
                .index
                .get(url)
                .cloned()
                .ok_or_else(|| DocgrabError::Cache(format!("no cache record for {url}")))?
        };

        let extraction_path = self.base_dir.join(&entry.extraction_file);
        let metadata_path = self.base_dir.join(&entry.metadata_file);

        let payload: ExtractionPayload = read_json(&extraction_path).await?;
        let metadata: PageMetadata = read_json(&metadata_path).await?;

        Ok((payload, metadata))
    }

    /// Store an extraction result for a URL.
    ///
    /// The extraction and metadata files are written first; only then is the
    /// in-memory index updated and flushed to disk. If the index flush fails
    /// the record files remain as orphans.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn put(
        &self,
        url: &str,
        content_hash: String,
        payload: &ExtractionPayload,
        metadata: &PageMetadata,
    ) -> Result<()> {
        // Reserve the url_hash under the lock, then write the record files
        // without it; only the map update and index flush re-acquire it.
        let url_hash = {
            let state = self.state.lock().await;
            match state.index.get(url) {
                Some(existing) => existing.url_hash.clone(),
                None => unique_url_hash(url, &state.index),
            }
        };

        let entry = IndexEntry {
            content_hash,
            extraction_file: format!("extractions/{url_hash}.json"),
            metadata_file: format!("metadata/{url_hash}_meta.json"),
            url_hash,
            last_extracted: Utc::now(),
        };

        write_json(&self.base_dir.join(&entry.extraction_file), payload).await?;
        write_json(&self.base_dir.join(&entry.metadata_file), metadata).await?;

        let mut state = self.state.lock().await;
        state.index.insert(url.to_string(), entry);
        persist_index(&self.base_dir.join(INDEX_FILE), &state.index).await?;

        debug!(url, "cache record written");
        Ok(())
    }

    /// Drop index entries whose extraction and metadata files are both
    /// missing. Returns the number of removed entries. Idempotent.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let mut stale: Vec<String> = Vec::new();
        for (url, entry) in &state.index {
            let extraction = self.base_dir.join(&entry.extraction_file);
            let metadata = self.base_dir.join(&entry.metadata_file);
            if !extraction.exists() && !metadata.exists() {
                stale.push(url.clone());
            }
        }

        for url in &stale {
            state.index.remove(url);
        }

        if !stale.is_empty() {
            persist_index(&self.base_dir.join(INDEX_FILE), &state.index).await?;
            info!(removed = stale.len(), "removed stale cache entries");
        }

        Ok(stale.len())
    }

    /// Current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;

        let mut extraction_files = 0;
        let mut metadata_files = 0;
        for entry in state.index.values() {
            if self.base_dir.join(&entry.extraction_file).exists() {
                extraction_files += 1;
            }
            if self.base_dir.join(&entry.metadata_file).exists() {
                metadata_files += 1;
            }
        }

        CacheStats {
            total_urls: state.index.len(),
            extraction_files,
            metadata_files,
            cache_hits: state.hits,
            cache_misses: state.misses,
        }
    }
}

// ---------------------------------------------------------------------------
// URL hashing
// ---------------------------------------------------------------------------

/// First 12 hex chars of SHA-256(url).
fn url_hash_prefix(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..URL_HASH_LEN].to_string()
}

/// Produce a url_hash that no *other* URL in the index already uses,
/// appending `-1`, `-2`, … on collision.
fn unique_url_hash(url: &str, index: &HashMap<String, IndexEntry>) -> String {
    let base = url_hash_prefix(url);
    let taken = |candidate: &str| index.values().any(|e| e.url_hash == candidate);

    if !taken(&base) {
        return base;
    }

    let mut suffix = 1;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

// ---------------------------------------------------------------------------
// Index persistence
// ---------------------------------------------------------------------------

async fn load_index(path: &Path) -> Result<HashMap<String, IndexEntry>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(DocgrabError::io(path, e)),
    };

    match serde_json::from_str(&raw) {
        Ok(index) => Ok(index),
        Err(e) => {
            // The index is the only copy of each content hash, so a corrupt
            // file cannot be rebuilt from the record files; start empty and
            // let reconcile collect the orphans.
            warn!(path = %path.display(), error = %e, "content index malformed, starting empty");
            Ok(HashMap::new())
        }
    }
}

/// Rewrite the index atomically: sibling temp file, fsync, rename.
async fn persist_index(path: &Path, index: &HashMap<String, IndexEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(index)
        .map_err(|e| DocgrabError::Cache(format!("index serialization failed: {e}")))?;

    let temp = path.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&temp)
        .await
        .map_err(|e| DocgrabError::io(&temp, e))?;
    tokio::io::AsyncWriteExt::write_all(&mut file, json.as_bytes())
        .await
        .map_err(|e| DocgrabError::io(&temp, e))?;
    file.sync_all()
        .await
        .map_err(|e| DocgrabError::io(&temp, e))?;
    drop(file);

    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| DocgrabError::io(path, e))?;

    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DocgrabError::io(path, e))?;
    serde_json::from_str(&raw)
        .map_err(|e| DocgrabError::Cache(format!("{}: invalid JSON: {e}", path.display())))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DocgrabError::Cache(format!("serialization failed: {e}")))?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| DocgrabError::io(path, e))
}
