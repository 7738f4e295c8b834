//! The batched scan-and-stream loop for one query.
//!
//! A [`QueryRun`] is a lazy iterator of [`StreamEvent`]s. Every call to
//! `next` scans at most one batch of files on the rayon pool and blocks until
//! that whole batch is done, so peak memory is bounded by one batch of file
//! content.
//!
//! There is no cancel token. Before a batch is started, and again before its
//! results are handed out, the run asks the [`SessionRegistry`] whether its
//! query is still the live one. If another query has been registered the run
//! ends as [`ExecutorState::Superseded`]; if the session has no live query at
//! all it ends as [`ExecutorState::SessionClosed`]. Either way no further
//! events are produced, not even `Done`.
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::matcher::{ExtractOptions, SearchQuery};
use super::processor::FileProcessor;
use super::session::{SessionId, SessionRegistry};
use crate::config::SearchConfig;
use crate::metrics::ScanMetrics;
use crate::results::{FileRef, FileResult, SearchSummary};
use crate::store::FileStore;

/// One item of a run's output stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "results", rename_all = "camelCase")]
pub enum StreamEvent {
    /// The first batch that produced results
    FirstBatch(Vec<FileResult>),
    /// Every later batch that produced results
    MoreResults(Vec<FileResult>),
    /// The whole scan finished without a single matching file
    NoResults,
    /// The scan finished
    Done,
}

impl StreamEvent {
    /// Results carried by this event, empty for the sentinels
    pub fn results(&self) -> &[FileResult] {
        match self {
            StreamEvent::FirstBatch(results) | StreamEvent::MoreResults(results) => {
                results.as_slice()
            }
            StreamEvent::NoResults | StreamEvent::Done => &[],
        }
    }

    pub fn into_results(self) -> Vec<FileResult> {
        match self {
            StreamEvent::FirstBatch(results) | StreamEvent::MoreResults(results) => results,
            StreamEvent::NoResults | StreamEvent::Done => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Scanning,
    Completed,
    /// A newer query was registered for the session
    Superseded,
    /// The session was closed or its live query cleared
    SessionClosed,
}

impl ExecutorState {
    pub fn is_finished(self) -> bool {
        !matches!(self, ExecutorState::Idle | ExecutorState::Scanning)
    }
}

/// Knobs that shape a run
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub batch_size: NonZeroUsize,
    pub max_file_size: u64,
    pub max_results: Option<usize>,
    pub extract: ExtractOptions,
}

impl ExecutorOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_file_size: config.max_file_size,
            max_results: config.max_results,
            extract: ExtractOptions {
                max_matches: config.max_matches_per_file,
                preview_radius: config.preview_radius,
            },
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// Starts query runs against a shared store, registry and thread pool
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn FileStore>,
    registry: Arc<SessionRegistry>,
    pool: Arc<ThreadPool>,
    options: ExecutorOptions,
    metrics: ScanMetrics,
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn FileStore>,
        registry: Arc<SessionRegistry>,
        pool: Arc<ThreadPool>,
        options: ExecutorOptions,
        metrics: ScanMetrics,
    ) -> Self {
        Self {
            store,
            registry,
            pool,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Registers `query` as live for `session` and returns the run.
    ///
    /// Registration happens here rather than on the first `next`, so any run
    /// previously started for the session is superseded immediately.
    pub fn run(&self, session: SessionId, query: SearchQuery, files: Arc<[FileRef]>) -> QueryRun {
        self.registry.set_live(&session, &query);
        debug!(
            "Run for '{}' in session {} over {} files",
            query,
            session,
            files.len()
        );

        let processor = FileProcessor::new(
            Arc::clone(&self.store),
            self.metrics.clone(),
            self.options.max_file_size,
            self.options.extract,
        );

        QueryRun {
            session,
            query,
            files,
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.pool),
            processor,
            batch_size: self.options.batch_size.get(),
            max_results: self.options.max_results,
            state: ExecutorState::Idle,
            next_file: 0,
            batches_emitted: 0,
            files_matched: 0,
            total_matches: 0,
            tail: VecDeque::new(),
            started: None,
        }
    }
}

/// One in-flight query, consumed as an iterator of [`StreamEvent`]s
pub struct QueryRun {
    session: SessionId,
    query: SearchQuery,
    files: Arc<[FileRef]>,
    registry: Arc<SessionRegistry>,
    pool: Arc<ThreadPool>,
    processor: FileProcessor,
    batch_size: usize,
    max_results: Option<usize>,
    state: ExecutorState,
    next_file: usize,
    batches_emitted: usize,
    files_matched: usize,
    total_matches: usize,
    // NoResults and Done, queued once scanning ends
    tail: VecDeque<StreamEvent>,
    started: Option<Instant>,
}

impl QueryRun {
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Number of files that have matched so far
    pub fn files_matched(&self) -> usize {
        self.files_matched
    }

    /// Number of matches found so far
    pub fn total_matches(&self) -> usize {
        self.total_matches
    }

    /// Drains the run into a summary
    pub fn collect_summary(self) -> SearchSummary {
        let mut summary = SearchSummary::new();
        for event in self {
            summary.add_batch(event.into_results());
        }
        summary
    }

    fn still_live(&mut self) -> bool {
        match self.registry.live_query(&self.session) {
            Some(live) if live == self.query => true,
            Some(live) => {
                debug!(
                    "Query '{}' superseded by '{}' in session {}",
                    self.query, live, self.session
                );
                self.state = ExecutorState::Superseded;
                false
            }
            None => {
                debug!(
                    "Session {} closed, dropping query '{}'",
                    self.session, self.query
                );
                self.state = ExecutorState::SessionClosed;
                false
            }
        }
    }

    fn result_cap_reached(&self) -> bool {
        self.max_results
            .is_some_and(|max| self.files_matched >= max)
    }

    fn scan_batch(&self, batch: &[FileRef]) -> Vec<FileResult> {
        let processor = &self.processor;
        let query = &self.query;
        // Collecting an indexed iterator keeps the snapshot order
        let scanned: Vec<Option<FileResult>> = self.pool.install(|| {
            batch
                .par_iter()
                .map(|file| processor.process_file(file, query))
                .collect()
        });
        scanned.into_iter().flatten().collect()
    }

    fn finish(&mut self) {
        if self.files_matched == 0 {
            self.tail.push_back(StreamEvent::NoResults);
        }
        self.tail.push_back(StreamEvent::Done);

        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        info!(
            "Query '{}' finished: {} matches in {} files ({} batches, {:?})",
            self.query, self.total_matches, self.files_matched, self.batches_emitted, elapsed
        );
        self.processor.metrics().log_stats();
    }
}

impl Iterator for QueryRun {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.tail.pop_front() {
            if self.tail.is_empty() {
                self.state = ExecutorState::Completed;
            }
            return Some(event);
        }

        match self.state {
            ExecutorState::Idle => {
                self.state = ExecutorState::Scanning;
                self.started = Some(Instant::now());
            }
            ExecutorState::Scanning => {}
            _ => return None,
        }

        loop {
            if self.next_file >= self.files.len() || self.result_cap_reached() {
                self.finish();
                return self.next();
            }

            if !self.still_live() {
                return None;
            }

            let start = self.next_file;
            let end = (start + self.batch_size).min(self.files.len());
            self.next_file = end;

            let files = Arc::clone(&self.files);
            let results = self.scan_batch(&files[start..end]);
            debug!(
                "Batch {}..{} of '{}' yielded {} files",
                start,
                end,
                self.query,
                results.len()
            );

            // Results scanned for a query that lost liveness are never delivered
            if !self.still_live() {
                return None;
            }
            if results.is_empty() {
                continue;
            }

            self.files_matched += results.len();
            self.total_matches += results.iter().map(|r| r.matches.len()).sum::<usize>();
            self.processor.metrics().record_batch();

            let event = if self.batches_emitted == 0 {
                StreamEvent::FirstBatch(results)
            } else {
                StreamEvent::MoreResults(results)
            };
            self.batches_emitted += 1;
            return Some(event);
        }
    }
}
