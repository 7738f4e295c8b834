pub mod cache;
pub mod config;
pub mod errors;
pub mod filters;
pub mod metrics;
pub mod resolver;
pub mod results;
pub mod search;
pub mod store;

pub use config::SearchConfig;
pub use errors::{SearchError, SearchResult};
pub use filters::QueryFilters;
pub use metrics::{ScanMetrics, ScanStats};
pub use resolver::FileSetResolver;
pub use results::{FileRef, FileResult, Match, SearchSummary};
pub use search::{QueryRun, SearchEngine, SearchQuery, SessionId, StreamEvent};
pub use store::{FileStore, FsFileStore, MemoryFileStore};
