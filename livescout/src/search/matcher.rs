//! Literal, case-insensitive line matching.
//!
//! Case folding maps every character to exactly one character (see
//! [`fold_case`]), so character indices in a folded line are valid indices
//! into the original line. Columns and preview columns are therefore counted
//! in characters, not bytes.
//!
//! Lines are split on `\n` only. A trailing `\r` from CRLF text stays part of
//! the line it ends and counts toward its length; previews drop it with the
//! rest of the trailing whitespace.
use std::fmt;
use std::path::Path;

use crate::results::Match;

/// Default number of characters kept on each side of a match in its preview.
pub const DEFAULT_PREVIEW_RADIUS: usize = 50;

/// Lower-cases one character, keeping it as a single character.
///
/// Characters whose lower-case form expands to several characters (such as
/// `İ`) are left unchanged so that folding never shifts positions.
pub fn fold_char(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}

/// Case-folds a string one character at a time.
pub fn fold_case(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// A normalized search query.
///
/// Two queries are equal when their trimmed text is equal.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    text: String,
    folded: String,
}

impl SearchQuery {
    /// Trims `raw`; returns `None` when nothing is left.
    pub fn new(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            folded: fold_case(text),
        })
    }

    /// The trimmed query text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The case-folded query text
    pub fn folded(&self) -> &str {
        &self.folded
    }

    /// Length of the query in characters
    pub fn char_len(&self) -> usize {
        self.folded.chars().count()
    }
}

impl PartialEq for SearchQuery {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for SearchQuery {}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Options for [`extract_matches`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Stop once this many matches have been collected
    pub max_matches: Option<usize>,
    /// Characters kept on each side of a match in its preview
    pub preview_radius: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_matches: None,
            preview_radius: DEFAULT_PREVIEW_RADIUS,
        }
    }
}

/// Finds every occurrence of `query` in `text`, line by line.
///
/// All non-overlapping occurrences in a line are reported left to right.
/// Scanning stops as soon as `max_matches` matches have been collected.
pub fn extract_matches(
    file_path: &Path,
    display_path: &str,
    text: &str,
    query: &SearchQuery,
    options: &ExtractOptions,
) -> Vec<Match> {
    let mut matches = Vec::new();
    if options.max_matches == Some(0) {
        return matches;
    }

    let needle = query.folded();
    let needle_chars = query.char_len();

    for (line_index, line) in text.split('\n').enumerate() {
        let folded = fold_case(line);
        if !folded.contains(needle) {
            continue;
        }

        let line_chars: Vec<char> = line.chars().collect();
        let mut scanned_bytes = 0;
        let mut scanned_chars = 0;

        for (byte_idx, _) in folded.match_indices(needle) {
            scanned_chars += folded[scanned_bytes..byte_idx].chars().count();
            scanned_bytes = byte_idx;
            let column = scanned_chars;

            let (preview, preview_column) =
                clamp_preview(&line_chars, column, needle_chars, options.preview_radius);

            matches.push(Match {
                file_path: file_path.to_path_buf(),
                relative_path: display_path.to_string(),
                line: line_index + 1,
                column,
                preview,
                preview_column,
            });

            if options.max_matches.is_some_and(|max| matches.len() >= max) {
                return matches;
            }
        }
    }

    matches
}

/// Cuts the preview window around a match and trims it.
///
/// Returns the preview and the match start within it.
fn clamp_preview(
    line: &[char],
    column: usize,
    match_len: usize,
    radius: usize,
) -> (String, usize) {
    let start = column.saturating_sub(radius);
    let end = line.len().min(column + match_len + radius);
    let window = &line[start..end];

    let leading = window.iter().take_while(|c| c.is_whitespace()).count();
    let preview: String = window[leading..].iter().collect();

    (preview.trim_end().to_string(), column - start - leading)
}
