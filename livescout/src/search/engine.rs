use dashmap::DashMap;
use rayon::ThreadPoolBuilder;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::executor::{ExecutorOptions, QueryExecutor, QueryRun};
use super::matcher::SearchQuery;
use super::session::{SessionId, SessionRegistry};
use crate::cache::ContentCache;
use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::filters::QueryFilters;
use crate::metrics::ScanMetrics;
use crate::resolver::FileSetResolver;
use crate::results::FileRef;
use crate::store::{FileStore, FsFileStore};

/// Entry point for hosts.
///
/// Each session owns a resolved file snapshot and at most one live query.
/// Snapshots are only rebuilt by [`open_session`](Self::open_session) and
/// [`refresh_session`](Self::refresh_session), never per query.
pub struct SearchEngine {
    config: SearchConfig,
    store: Arc<dyn FileStore>,
    resolver: FileSetResolver,
    executor: QueryExecutor,
    registry: Arc<SessionRegistry>,
    sessions: DashMap<SessionId, Arc<[FileRef]>>,
    cache: ContentCache,
    metrics: ScanMetrics,
}

impl SearchEngine {
    pub fn new(config: SearchConfig, store: Arc<dyn FileStore>) -> SearchResult<Self> {
        config.validate()?;
        let resolver = FileSetResolver::from_config(&config)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.thread_count.get())
            .thread_name(|i| format!("livescout-scan-{}", i))
            .build()
            .map_err(|e| SearchError::config_error(format!("thread pool: {}", e)))?;

        let registry = Arc::new(SessionRegistry::new());
        let metrics = ScanMetrics::new();
        let executor = QueryExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::new(pool),
            ExecutorOptions::from_config(&config),
            metrics.clone(),
        );

        info!(
            "Search engine ready ({} threads, batch size {})",
            config.thread_count, config.batch_size
        );

        Ok(Self {
            config,
            store,
            resolver,
            executor,
            registry,
            sessions: DashMap::new(),
            cache: ContentCache::new(),
            metrics,
        })
    }

    /// Builds an engine over the local filesystem rooted at `config.roots`
    pub fn from_config(config: SearchConfig) -> SearchResult<Self> {
        let store = FsFileStore::new(config.roots.iter().cloned(), config.use_ignore_files);
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// Resolves the file set for `session`, replacing any earlier snapshot.
    /// Returns the number of searchable files.
    pub fn open_session(&self, session: &SessionId) -> usize {
        let files: Arc<[FileRef]> = self.resolver.resolve(self.store.as_ref()).into();
        let count = files.len();
        self.sessions.insert(session.clone(), files);
        info!("Opened session {} with {} files", session, count);
        count
    }

    /// Re-resolves the file set of an open session
    pub fn refresh_session(&self, session: &SessionId) -> SearchResult<usize> {
        if !self.sessions.contains_key(session) {
            return Err(SearchError::unknown_session(session.as_str()));
        }
        Ok(self.open_session(session))
    }

    /// The current snapshot of an open session
    pub fn session_files(&self, session: &SessionId) -> SearchResult<Arc<[FileRef]>> {
        self.sessions
            .get(session)
            .map(|files| Arc::clone(files.value()))
            .ok_or_else(|| SearchError::unknown_session(session.as_str()))
    }

    pub fn is_open(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    /// Starts a query for `session`.
    ///
    /// Blank input returns `Ok(None)` and clears the live query, so any run
    /// still in flight for the session stops at its next batch.
    pub fn submit_query(&self, session: &SessionId, raw: &str) -> SearchResult<Option<QueryRun>> {
        self.submit_query_with(session, raw, &QueryFilters::default())
    }

    /// Like [`submit_query`](Self::submit_query), restricted to the files of
    /// the snapshot that `filters` allows.
    pub fn submit_query_with(
        &self,
        session: &SessionId,
        raw: &str,
        filters: &QueryFilters,
    ) -> SearchResult<Option<QueryRun>> {
        let files = self.session_files(session)?;

        let Some(query) = SearchQuery::new(raw) else {
            debug!("Blank query in session {}, clearing", session);
            self.registry.clear(session);
            return Ok(None);
        };

        let files = if filters.is_unconstrained() {
            files
        } else {
            let filtered: Arc<[FileRef]> = files
                .iter()
                .filter(|file| filters.allows(file.display_path()))
                .cloned()
                .collect();
            debug!(
                "Query filters kept {} of {} files",
                filtered.len(),
                files.len()
            );
            filtered
        };

        Ok(Some(self.executor.run(session.clone(), query, files)))
    }

    /// Stops any run in flight for `session` and drops its snapshot.
    /// Returns whether the session was open.
    pub fn close_session(&self, session: &SessionId) -> bool {
        self.registry.clear(session);
        let was_open = self.sessions.remove(session).is_some();
        if was_open {
            info!("Closed session {}", session);
        }
        was_open
    }

    /// The query currently live for `session`
    pub fn live_query(&self, session: &SessionId) -> Option<SearchQuery> {
        self.registry.live_query(session)
    }

    /// Drops `path` from the preview cache after it changed externally
    pub fn invalidate(&self, path: &Path) -> bool {
        let dropped = self.cache.invalidate(path);
        if dropped {
            debug!("Invalidated cached content of {}", path.display());
        }
        dropped
    }

    /// Text of `path` for preview rendering, served from the preview cache
    pub fn file_content(&self, path: &Path) -> SearchResult<Arc<str>> {
        self.cache
            .get_or_load(path, self.store.as_ref(), &self.metrics)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }
}
