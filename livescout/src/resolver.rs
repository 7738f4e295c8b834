//! Resolves the searchable file set for a session.
//!
//! Resolution runs once per session open, not per query. The resulting
//! snapshot is sorted in folder-tree order: at every level directories come
//! before files, names compare at primary strength (case and accents are
//! ignored, punctuation sorts before digits and digits before letters), and a
//! path that is a prefix of another sorts first.
use std::borrow::Cow;
use std::cmp::Ordering;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::SearchConfig;
use crate::errors::SearchResult;
use crate::filters::ExcludeFilter;
use crate::results::FileRef;
use crate::store::FileStore;

/// Enumerates, filters and sorts the files a session searches.
#[derive(Debug, Clone)]
pub struct FileSetResolver {
    exclude: ExcludeFilter,
    max_files: Option<usize>,
    time_budget: Duration,
}

impl FileSetResolver {
    pub fn new(exclude: ExcludeFilter, max_files: Option<usize>, time_budget: Duration) -> Self {
        Self {
            exclude,
            max_files,
            time_budget,
        }
    }

    /// Builds a resolver from the exclude sets, binary extensions, file limit
    /// and enumeration timeout of `config`.
    pub fn from_config(config: &SearchConfig) -> SearchResult<Self> {
        let exclude = ExcludeFilter::new(
            &config.search_exclude,
            &config.files_exclude,
            &config.binary_extensions,
        )?;
        Ok(Self::new(
            exclude,
            config.max_files_to_search,
            config.enumeration_timeout()?,
        ))
    }

    pub fn exclude_filter(&self) -> &ExcludeFilter {
        &self.exclude
    }

    /// Enumerates the store and returns the sorted snapshot. Running out of
    /// time is not an error; the files gathered so far are returned.
    pub fn resolve(&self, store: &dyn FileStore) -> Vec<FileRef> {
        let started = Instant::now();
        let deadline = started + self.time_budget;

        let mut paths = store.enumerate(&self.exclude, self.max_files, deadline);
        if let Some(max) = self.max_files {
            paths.truncate(max);
        }
        if Instant::now() >= deadline {
            debug!(
                "File enumeration hit its {:?} budget, continuing with {} files",
                self.time_budget,
                paths.len()
            );
        }

        paths.sort_by(|a, b| compare_paths(a, b));
        let files: Vec<FileRef> = paths
            .into_iter()
            .map(|path| {
                let display = store.display_path(&path);
                FileRef::new(path, display)
            })
            .collect();

        info!(
            "Resolved {} searchable files in {:?}",
            files.len(),
            started.elapsed()
        );
        files
    }
}

fn segments(path: &Path) -> Vec<Cow<'_, str>> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect()
}

/// ASCII punctuation in root collation order.
const PUNCTUATION_ORDER: &str = "_-,;:!?.'\"()[]{}@*/\\&#%`^+<=>|~$";

/// Primary weight of one folded character: whitespace, then punctuation,
/// then other symbols, then digits, then letters.
fn primary_weight(c: char) -> (u8, u32) {
    if c.is_whitespace() {
        (0, c as u32)
    } else if let Some(rank) = PUNCTUATION_ORDER.find(c) {
        (1, rank as u32)
    } else if c.is_numeric() {
        (3, c.to_digit(10).unwrap_or(c as u32))
    } else if c.is_alphabetic() {
        (4, c as u32)
    } else {
        (2, c as u32)
    }
}

/// Decomposes, lower-cases and drops combining marks, so `É` and `e` weigh
/// the same.
fn collation_key(segment: &str) -> impl Iterator<Item = (u8, u32)> + '_ {
    segment
        .nfd()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c))
        .map(primary_weight)
}

/// Primary-strength comparison of two path segments.
fn collate(a: &str, b: &str) -> Ordering {
    collation_key(a).cmp(collation_key(b))
}

/// Folder-tree ordering of two paths.
///
/// Paths that collate equal segment by segment are ordered by their raw bytes
/// so that the ordering is total.
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    let seg_a = segments(a);
    let seg_b = segments(b);

    for i in 0..seg_a.len().min(seg_b.len()) {
        let last_a = i == seg_a.len() - 1;
        let last_b = i == seg_b.len() - 1;
        if last_a != last_b {
            return if last_a {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
        match collate(&seg_a[i], &seg_b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    seg_a.len().cmp(&seg_b.len()).then_with(|| a.cmp(b))
}
