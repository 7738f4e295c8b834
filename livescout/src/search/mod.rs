//! Query execution: matching, per-file scanning, session liveness and the
//! batched streaming loop, tied together by [`SearchEngine`].
//!
//! A typical host opens a session once, then submits a query per keystroke
//! and drains the returned [`QueryRun`] on a worker thread:
//!
//! ```rust,no_run
//! use livescout::search::{SearchEngine, SessionId, StreamEvent};
//! use livescout::SearchConfig;
//!
//! # fn main() -> livescout::SearchResult<()> {
//! let engine = SearchEngine::from_config(SearchConfig::default())?;
//! let panel = SessionId::new("panel-1");
//! engine.open_session(&panel);
//!
//! if let Some(run) = engine.submit_query(&panel, "todo")? {
//!     for event in run {
//!         match event {
//!             StreamEvent::FirstBatch(results) | StreamEvent::MoreResults(results) => {
//!                 for file in results {
//!                     println!("{}: {} matches", file.relative_path, file.matches.len());
//!                 }
//!             }
//!             StreamEvent::NoResults => println!("no results"),
//!             StreamEvent::Done => {}
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
pub mod engine;
pub mod executor;
pub mod matcher;
pub mod processor;
pub mod session;

pub use engine::SearchEngine;
pub use executor::{ExecutorOptions, ExecutorState, QueryExecutor, QueryRun, StreamEvent};
pub use matcher::{extract_matches, fold_case, ExtractOptions, SearchQuery};
pub use processor::FileProcessor;
pub use session::{SessionId, SessionRegistry};
