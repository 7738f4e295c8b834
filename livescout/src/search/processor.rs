use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use tracing::{trace, warn};

use super::matcher::{extract_matches, fold_case, ExtractOptions, SearchQuery};
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::results::{FileRef, FileResult};
use crate::store::FileStore;

/// Decodes bytes as UTF-8, replacing invalid sequences.
pub fn decode_lossy<'a>(bytes: &'a [u8], path: &Path) -> Cow<'a, str> {
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = text {
        warn!("Invalid UTF-8 replaced in file: {}", path.display());
    }
    text
}

/// Scans one file for one query
#[derive(Clone)]
pub struct FileProcessor {
    store: Arc<dyn FileStore>,
    metrics: ScanMetrics,
    max_file_size: u64,
    extract: ExtractOptions,
}

impl FileProcessor {
    pub fn new(
        store: Arc<dyn FileStore>,
        metrics: ScanMetrics,
        max_file_size: u64,
        extract: ExtractOptions,
    ) -> Self {
        Self {
            store,
            metrics,
            max_file_size,
            extract,
        }
    }

    /// Gets the current scan metrics
    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Returns the file's matches, or `None` when the file is too large,
    /// cannot be read, or does not contain the query.
    pub fn process_file(&self, file: &FileRef, query: &SearchQuery) -> Option<FileResult> {
        match self.try_process(file, query) {
            Ok(result) => result,
            Err(err) => {
                trace!("Treating {} as non-matching: {}", file.display_path(), err);
                self.metrics.record_failure();
                None
            }
        }
    }

    fn try_process(
        &self,
        file: &FileRef,
        query: &SearchQuery,
    ) -> SearchResult<Option<FileResult>> {
        let path = file.path();
        let size = file
            .size(self.store.as_ref())
            .map_err(|e| SearchError::from_io(path, e))?;
        if self.skip_oversized(file, size) {
            return Ok(None);
        }

        let content = self
            .store
            .read(path)
            .map_err(|e| SearchError::from_io(path, e))?;
        // The file may have grown between the stat and the read
        if self.skip_oversized(file, content.len() as u64) {
            return Ok(None);
        }
        self.metrics
            .record_read(content.len() as u64, content.is_mapped());

        let text = decode_lossy(&content, path);
        if !fold_case(&text).contains(query.folded()) {
            trace!("Quick reject: {}", file.display_path());
            self.metrics.record_quick_reject();
            return Ok(None);
        }

        let matches = extract_matches(path, file.display_path(), &text, query, &self.extract);
        self.metrics.record_matches(matches.len());
        Ok(FileResult::from_matches(file, matches))
    }

    fn skip_oversized(&self, file: &FileRef, size: u64) -> bool {
        if size <= self.max_file_size {
            return false;
        }
        trace!(
            "Skipping {} ({} bytes > {} limit)",
            file.display_path(),
            size,
            self.max_file_size
        );
        self.metrics.record_oversized();
        true
    }
}
