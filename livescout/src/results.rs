//! Result types shared by the resolver, the executor and hosts.
//!
//! `Match` and `FileResult` serialize with camelCase field names so a host can
//! forward them to a presentation layer unchanged.
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::store::FileStore;

/// A searchable file from a resolved snapshot.
#[derive(Debug, Clone)]
pub struct FileRef {
    path: PathBuf,
    display_path: String,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>, display_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_path: display_path.into(),
        }
    }

    /// Absolute path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Workspace-relative path used for display and glob matching
    pub fn display_path(&self) -> &str {
        &self.display_path
    }

    /// Current byte size. Snapshots outlive many runs, so this asks the
    /// store every time.
    pub fn size(&self, store: &dyn FileStore) -> io::Result<u64> {
        store.size(&self.path)
    }
}

/// One occurrence of the query within one line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Absolute path of the file
    pub file_path: PathBuf,
    /// Workspace-relative path of the file
    pub relative_path: String,
    /// 1-based line number
    pub line: usize,
    /// 0-based character index of the match start within the line
    pub column: usize,
    /// Trimmed window of the line around the match
    pub preview: String,
    /// Character index of the match start within `preview`
    pub preview_column: usize,
}

/// All matches found in a single file, in top-to-bottom order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_path: PathBuf,
    pub relative_path: String,
    pub matches: Vec<Match>,
    /// Opaque host data (an icon descriptor, for example). Never read or set
    /// by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoration: Option<serde_json::Value>,
}

impl FileResult {
    /// Builds a result from a non-empty match list; returns `None` otherwise.
    pub fn from_matches(file: &FileRef, matches: Vec<Match>) -> Option<Self> {
        if matches.is_empty() {
            return None;
        }
        debug_assert!(matches.iter().all(|m| m.file_path == file.path()));
        Some(Self {
            file_path: file.path().to_path_buf(),
            relative_path: file.display_path().to_string(),
            matches,
            decoration: None,
        })
    }
}

/// Accumulated output of one query run
#[derive(Debug, Clone, Default)]
pub struct SearchSummary {
    /// Results per file, in emission order
    pub file_results: Vec<FileResult>,
    /// Total number of matches found
    pub total_matches: usize,
    /// Total number of files with matches
    pub files_with_matches: usize,
    /// Number of non-empty batches delivered
    pub batches: usize,
}

impl SearchSummary {
    /// Creates a new empty summary
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds one delivered batch
    pub fn add_batch(&mut self, results: Vec<FileResult>) {
        if results.is_empty() {
            return;
        }
        self.batches += 1;
        for file_result in results {
            self.total_matches += file_result.matches.len();
            self.files_with_matches += 1;
            self.file_results.push(file_result);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_results.is_empty()
    }
}
