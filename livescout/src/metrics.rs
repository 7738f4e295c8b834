use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Counters describing what a scan did with each file
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // File outcomes
    files_scanned: Arc<AtomicU64>,
    files_oversized: Arc<AtomicU64>,
    files_quick_rejected: Arc<AtomicU64>,
    files_failed: Arc<AtomicU64>,
    files_mapped: Arc<AtomicU64>,

    // Volume
    bytes_read: Arc<AtomicU64>,
    matches_found: Arc<AtomicU64>,
    batches_emitted: Arc<AtomicU64>,

    // Preview cache
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            files_scanned: Arc::new(AtomicU64::new(0)),
            files_oversized: Arc::new(AtomicU64::new(0)),
            files_quick_rejected: Arc::new(AtomicU64::new(0)),
            files_failed: Arc::new(AtomicU64::new(0)),
            files_mapped: Arc::new(AtomicU64::new(0)),
            bytes_read: Arc::new(AtomicU64::new(0)),
            matches_found: Arc::new(AtomicU64::new(0)),
            batches_emitted: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a file whose content was read
    pub fn record_read(&self, bytes: u64, mapped: bool) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        if mapped {
            self.files_mapped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a file skipped for exceeding the size limit
    pub fn record_oversized(&self) {
        self.files_oversized.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a file whose text did not contain the query at all
    pub fn record_quick_reject(&self) {
        self.files_quick_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a file that could not be stat'ed or read
    pub fn record_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_matches(&self, count: usize) {
        self.matches_found
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records preview cache operation
    pub fn record_cache_operation(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gets current statistics
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            files_oversized: self.files_oversized.load(Ordering::Relaxed),
            files_quick_rejected: self.files_quick_rejected.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_mapped: self.files_mapped.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            batches_emitted: self.batches_emitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Scan stats:\n\
             Files read: {} ({} mapped, {} bytes)\n\
             Files skipped (oversized/quick-reject/failed): {}/{}/{}\n\
             Matches found: {}\n\
             Batches emitted: {}\n\
             Preview cache hits/misses: {}/{}",
            stats.files_scanned,
            stats.files_mapped,
            stats.bytes_read,
            stats.files_oversized,
            stats.files_quick_rejected,
            stats.files_failed,
            stats.matches_found,
            stats.batches_emitted,
            stats.cache_hits,
            stats.cache_misses
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`ScanMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub files_oversized: u64,
    pub files_quick_rejected: u64,
    pub files_failed: u64,
    pub files_mapped: u64,
    pub bytes_read: u64,
    pub matches_found: u64,
    pub batches_emitted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
