//! Glob and binary-extension filtering.
//!
//! Globs are matched against `/`-separated display paths:
//!
//! * `*` matches within one path segment
//! * `**` matches any number of segments, including none
//! * `?` matches one character other than `/`
//! * `{a,b}` matches either alternative
//!
//! Every other character is literal. A pattern string may hold several
//! comma-separated patterns, which are OR'd.
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::{SearchError, SearchResult};

/// File extensions that are never searched.
pub const DEFAULT_BINARY_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "ico", "svg", "webp", "mp4", "avi", "mov", "wmv", "flv",
    "mp3", "wav", "ogg", "pdf", "zip", "tar", "gz", "rar", "7z", "exe", "dll", "so", "bin", "dat",
    "db", "sqlite", "woff", "woff2", "ttf", "eot", "class", "jar", "war", "ear", "o", "a", "lib",
    "dylib",
];

/// Build output and dependency folders.
pub const DEFAULT_SEARCH_EXCLUDE: &[&str] = &[
    "**/node_modules/**",
    "**/.next/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/*.min.js",
    "**/*.min.css",
    "**/bower_components/**",
    "**/vendor/**",
    "**/__pycache__/**",
    "**/*.pyc",
    "**/venv/**",
    "**/.venv/**",
    "**/target/**",
    "**/.gradle/**",
    "**/.idea/**",
    "**/coverage/**",
    "**/.nyc_output/**",
    "**/.cache/**",
    "**/.nuxt/**",
    "**/*.lock",
    "**/package-lock.json",
];

/// Version-control metadata and OS droppings.
pub const DEFAULT_FILES_EXCLUDE: &[&str] = &[
    "**/.git",
    "**/.svn",
    "**/.hg",
    "**/CVS",
    "**/.DS_Store",
    "**/Thumbs.db",
];

/// Compiled globs are shared across sessions. Query filters arrive with every
/// keystroke, so the cache is dropped wholesale once it reaches this size.
const GLOB_CACHE_CAPACITY: usize = 256;

static GLOB_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// A single compiled glob.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Arc<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> SearchResult<Self> {
        if let Some(regex) = GLOB_CACHE.get(pattern) {
            return Ok(Self {
                source: pattern.to_string(),
                regex: regex.clone(),
            });
        }

        let translated = glob_to_regex(pattern)?;
        let regex = Arc::new(
            Regex::new(&translated).map_err(|e| SearchError::invalid_pattern(e.to_string()))?,
        );
        if GLOB_CACHE.len() >= GLOB_CACHE_CAPACITY {
            GLOB_CACHE.clear();
        }
        GLOB_CACHE.insert(pattern.to_string(), regex.clone());
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Translates a glob into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> SearchResult<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    let mut brace_depth = 0usize;
    let mut i = 0;

    out.push('^');
    while i < len {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                match chars.get(i + 2) {
                    Some('/') if at_segment_start => {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    }
                    None if at_segment_start => {
                        out.push_str(".*");
                        i += 2;
                    }
                    _ => {
                        out.push_str("[^/]*");
                        i += 2;
                    }
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '/' if i + 3 == len && chars[i + 1] == '*' && chars[i + 2] == '*' => {
                out.push_str("(?:/.*)?");
                i += 3;
                continue;
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }
    out.push('$');

    if brace_depth != 0 {
        return Err(SearchError::invalid_pattern(format!(
            "unclosed brace in glob: {}",
            pattern
        )));
    }
    Ok(out)
}

/// Splits a pattern list on commas that are not inside a brace group.
fn split_top_level(patterns: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in patterns.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&patterns[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&patterns[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// A set of globs, OR'd together.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    patterns: Vec<GlobPattern>,
}

impl GlobSet {
    /// Compiles a list of patterns, dropping duplicates and blanks.
    pub fn new<I, S>(patterns: I) -> SearchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || !seen.insert(pattern.to_string()) {
                continue;
            }
            compiled.push(GlobPattern::new(pattern)?);
        }
        Ok(Self { patterns: compiled })
    }

    /// Compiles a comma-separated pattern list.
    pub fn parse(patterns: &str) -> SearchResult<Self> {
        Self::new(split_top_level(patterns))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    /// True if the path or any of its ancestor directories matches, so that a
    /// folder pattern such as `**/.git` excludes everything below it.
    pub fn is_match_or_ancestor(&self, path: &str) -> bool {
        if self.is_match(path) {
            return true;
        }
        path.match_indices('/')
            .any(|(idx, _)| idx > 0 && self.is_match(&path[..idx]))
    }
}

/// Checks if a path carries one of the given (lower-case) extensions.
pub fn has_extension_in(path: &str, extensions: &HashSet<String>) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => extensions.contains(&ext.to_ascii_lowercase()),
        _ => false,
    }
}

/// The combined exclusion predicate applied while resolving the file set.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    globs: GlobSet,
    binary_extensions: HashSet<String>,
}

impl ExcludeFilter {
    /// Builds the filter from two independently configured exclude sets and
    /// an extension denylist. The glob sets are unioned and de-duplicated.
    pub fn new<S: AsRef<str>>(
        search_exclude: &[S],
        files_exclude: &[S],
        binary_extensions: &[S],
    ) -> SearchResult<Self> {
        let globs = GlobSet::new(
            search_exclude
                .iter()
                .chain(files_exclude.iter())
                .map(|p| p.as_ref()),
        )?;
        let binary_extensions = binary_extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Ok(Self {
            globs,
            binary_extensions,
        })
    }

    pub fn is_binary(&self, display_path: &str) -> bool {
        has_extension_in(display_path, &self.binary_extensions)
    }

    pub fn is_excluded(&self, display_path: &str) -> bool {
        self.is_binary(display_path) || self.globs.is_match_or_ancestor(display_path)
    }

    /// Directory check used to prune a walk. Ancestors were already checked
    /// on the way down, so only the directory itself is tested.
    pub fn is_excluded_dir(&self, display_path: &str) -> bool {
        self.globs.is_match(display_path)
    }

    pub fn glob_count(&self) -> usize {
        self.globs.len()
    }
}

/// Include and exclude globs supplied with a single query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    include: GlobSet,
    exclude: GlobSet,
}

impl QueryFilters {
    /// Parses comma-separated include and exclude lists. Blank strings mean
    /// no constraint.
    pub fn new(include: &str, exclude: &str) -> SearchResult<Self> {
        Ok(Self {
            include: GlobSet::parse(include)?,
            exclude: GlobSet::parse(exclude)?,
        })
    }

    pub fn is_unconstrained(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn allows(&self, display_path: &str) -> bool {
        if !self.include.is_empty() && !self.include.is_match(display_path) {
            return false;
        }
        !self.exclude.is_match_or_ancestor(display_path)
    }
}
