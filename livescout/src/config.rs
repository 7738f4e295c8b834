use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{SearchError, SearchResult};
use crate::filters::{DEFAULT_BINARY_EXTENSIONS, DEFAULT_FILES_EXCLUDE, DEFAULT_SEARCH_EXCLUDE};

/// Configuration for search sessions.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.livescout.yaml` in the current directory
/// 3. Global `$HOME/.config/livescout/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// roots: ["."]
///
/// # Two independent exclude sets, unioned at resolution time
/// search_exclude:
///   - "**/node_modules/**"
/// files_exclude:
///   - "**/.git"
///
/// max_results: 200
/// max_matches_per_file: 50
/// max_file_size: 512000
/// batch_size: 100
/// preview_radius: 50
/// enumeration_timeout: "1s"
/// thread_count: 4
/// log_level: "info"
/// ```
///
/// Every field has a default, so an empty file is a valid configuration.
/// Command-line arguments take precedence over file values; see
/// [`SearchConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Directories whose files are searched
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// First exclude set (glob syntax), typically build and dependency output
    #[serde(default = "default_search_exclude")]
    pub search_exclude: Vec<String>,

    /// Second exclude set (glob syntax), typically VCS metadata
    #[serde(default = "default_files_exclude")]
    pub files_exclude: Vec<String>,

    /// Extensions that are never searched
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,

    /// Stop scheduling batches once this many files have matched
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Stop scanning a file once it has produced this many matches
    #[serde(default)]
    pub max_matches_per_file: Option<usize>,

    /// Cap on the number of files a session resolves
    #[serde(default)]
    pub max_files_to_search: Option<usize>,

    /// Files larger than this many bytes are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Number of files scanned concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,

    /// Characters kept on each side of a match in its preview
    #[serde(default = "default_preview_radius")]
    pub preview_radius: usize,

    /// Soft deadline for file enumeration, in humantime syntax ("1s", "500ms")
    #[serde(default = "default_enumeration_timeout")]
    pub enumeration_timeout: String,

    /// Honour .gitignore and .ignore files while enumerating
    #[serde(default = "default_true")]
    pub use_ignore_files: bool,

    /// Number of threads used to scan a batch
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_search_exclude() -> Vec<String> {
    DEFAULT_SEARCH_EXCLUDE.iter().map(|s| s.to_string()).collect()
}

fn default_files_exclude() -> Vec<String> {
    DEFAULT_FILES_EXCLUDE.iter().map(|s| s.to_string()).collect()
}

fn default_binary_extensions() -> Vec<String> {
    DEFAULT_BINARY_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_size() -> u64 {
    500 * 1024
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(100).unwrap()
}

fn default_preview_radius() -> usize {
    50
}

fn default_enumeration_timeout() -> String {
    "1s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            search_exclude: default_search_exclude(),
            files_exclude: default_files_exclude(),
            binary_extensions: default_binary_extensions(),
            max_results: None,
            max_matches_per_file: None,
            max_files_to_search: None,
            max_file_size: default_max_file_size(),
            batch_size: default_batch_size(),
            preview_radius: default_preview_radius(),
            enumeration_timeout: default_enumeration_timeout(),
            use_ignore_files: true,
            thread_count: default_thread_count(),
            log_level: default_log_level(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration from the default locations
    pub fn load() -> SearchResult<Self> {
        Self::load_from(None)
    }

    /// Loads configuration from the default locations plus a specific file
    pub fn load_from(config_path: Option<&Path>) -> SearchResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("livescout/config.yaml")),
            Some(PathBuf::from(".livescout.yaml")),
        ];
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: SearchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that deserialize but cannot be used
    pub fn validate(&self) -> SearchResult<()> {
        self.enumeration_timeout()?;
        if self.roots.is_empty() {
            return Err(SearchError::config_error("at least one root is required"));
        }
        Ok(())
    }

    /// Parsed enumeration timeout
    pub fn enumeration_timeout(&self) -> SearchResult<Duration> {
        humantime::parse_duration(&self.enumeration_timeout).map_err(|e| {
            SearchError::config_error(format!(
                "invalid enumeration_timeout '{}': {}",
                self.enumeration_timeout, e
            ))
        })
    }

    /// Renders the configuration as YAML, in the format `load_from` reads.
    pub fn to_yaml(&self) -> SearchResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| SearchError::config_error(format!("cannot render config: {}", e)))
    }

    /// Merges CLI arguments with configuration file values.
    ///
    /// Only fields the CLI actually set (non-default) replace file values.
    pub fn merge_with_cli(mut self, cli: SearchConfig) -> Self {
        if cli.roots != default_roots() {
            self.roots = cli.roots;
        }
        if cli.search_exclude != default_search_exclude() {
            self.search_exclude = cli.search_exclude;
        }
        if cli.files_exclude != default_files_exclude() {
            self.files_exclude = cli.files_exclude;
        }
        if cli.max_results.is_some() {
            self.max_results = cli.max_results;
        }
        if cli.max_matches_per_file.is_some() {
            self.max_matches_per_file = cli.max_matches_per_file;
        }
        if cli.max_files_to_search.is_some() {
            self.max_files_to_search = cli.max_files_to_search;
        }
        if cli.max_file_size != default_max_file_size() {
            self.max_file_size = cli.max_file_size;
        }
        if cli.batch_size != default_batch_size() {
            self.batch_size = cli.batch_size;
        }
        if cli.preview_radius != default_preview_radius() {
            self.preview_radius = cli.preview_radius;
        }
        if cli.enumeration_timeout != default_enumeration_timeout() {
            self.enumeration_timeout = cli.enumeration_timeout;
        }
        if !cli.use_ignore_files {
            self.use_ignore_files = false;
        }
        if cli.thread_count != default_thread_count() {
            self.thread_count = cli.thread_count;
        }
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        self
    }
}
