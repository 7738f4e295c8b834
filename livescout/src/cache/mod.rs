//! Preview content cache for hosts.
//!
//! Scans always read through the [`FileStore`]; this cache only serves
//! [`SearchEngine::file_content`](crate::search::SearchEngine::file_content),
//! so a host can render previews without re-reading a file for every result.
//! Hosts drop entries with `invalidate` when a file changes on disk.
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::search::processor::decode_lossy;
use crate::store::FileStore;

/// Decoded file content keyed by absolute path
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<PathBuf, Arc<str>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached text of `path`, loading it through `store` on a miss.
    ///
    /// Invalid UTF-8 is replaced, never rejected. Read failures are returned
    /// and nothing is cached for the path.
    pub fn get_or_load(
        &self,
        path: &Path,
        store: &dyn FileStore,
        metrics: &ScanMetrics,
    ) -> SearchResult<Arc<str>> {
        if let Some(text) = self.entries.get(path) {
            metrics.record_cache_operation(true);
            return Ok(Arc::clone(text.value()));
        }
        metrics.record_cache_operation(false);

        let content = store
            .read(path)
            .map_err(|e| SearchError::from_io(path, e))?;
        let text: Arc<str> = decode_lossy(&content, path).into();
        trace!("Cached preview content for {}", path.display());

        let entry = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&text));
        Ok(Arc::clone(entry.value()))
    }

    /// Drops one path; returns whether it was cached
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
