//! File store capability consumed by the engine.
//!
//! The engine never walks directories or opens files itself; it goes through a
//! [`FileStore`]. [`FsFileStore`] backs the store with the local filesystem and
//! [`MemoryFileStore`] keeps everything in memory for tests and embedding.
use dashmap::{DashMap, DashSet};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace};

use crate::filters::ExcludeFilter;

/// Files at or above this size are memory-mapped instead of read.
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// Raw bytes of one file.
#[derive(Debug)]
pub enum FileContent {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl FileContent {
    pub fn is_mapped(&self) -> bool {
        matches!(self, FileContent::Mapped(_))
    }
}

impl Deref for FileContent {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileContent::Owned(bytes) => bytes,
            FileContent::Mapped(mmap) => mmap,
        }
    }
}

/// Access to the searchable files.
///
/// `enumerate` must stop once `max_files` paths have been gathered or the
/// deadline has passed, returning whatever it has. Only `enumerate`, `size`
/// and `read` may block.
pub trait FileStore: Send + Sync {
    /// Lists every file under the store's roots that `exclude` lets through.
    fn enumerate(
        &self,
        exclude: &ExcludeFilter,
        max_files: Option<usize>,
        deadline: Instant,
    ) -> Vec<PathBuf>;

    /// Byte size of a file without reading it
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Full content of a file
    fn read(&self, path: &Path) -> io::Result<FileContent>;

    /// Workspace-relative, `/`-separated path used for display and globbing
    fn display_path(&self, path: &Path) -> String;
}

/// Joins the normal components of `path` below the first matching root.
fn relative_display(roots: &[PathBuf], path: &Path) -> String {
    for root in roots {
        if let Ok(rest) = path.strip_prefix(root) {
            return join_components(rest);
        }
    }
    path.to_string_lossy().replace('\\', "/")
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A [`FileStore`] over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsFileStore {
    roots: Vec<PathBuf>,
    use_ignore_files: bool,
}

impl FsFileStore {
    /// Creates a store over `roots`. Roots are canonicalized when possible so
    /// that display paths stay stable.
    pub fn new<I, P>(roots: I, use_ignore_files: bool) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|root| {
                let root = root.as_ref();
                root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
            })
            .collect();
        Self {
            roots,
            use_ignore_files,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl FileStore for FsFileStore {
    fn enumerate(
        &self,
        exclude: &ExcludeFilter,
        max_files: Option<usize>,
        deadline: Instant,
    ) -> Vec<PathBuf> {
        let mut roots = self.roots.iter();
        let Some(first) = roots.next() else {
            return Vec::new();
        };
        if max_files == Some(0) {
            return Vec::new();
        }

        let mut builder = WalkBuilder::new(first);
        for root in roots {
            builder.add(root);
        }
        builder
            .standard_filters(self.use_ignore_files)
            .hidden(false)
            .require_git(false)
            .follow_links(false);

        let prune_roots = self.roots.clone();
        let prune_filter = exclude.clone();
        builder.filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return true;
            }
            let display = relative_display(&prune_roots, entry.path());
            display.is_empty() || !prune_filter.is_excluded_dir(&display)
        });

        let mut files = Vec::new();
        for entry in builder.build() {
            if Instant::now() >= deadline {
                debug!(
                    "Enumeration deadline reached after {} files, returning partial set",
                    files.len()
                );
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    trace!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let shown = relative_display(&self.roots, entry.path());
            if exclude.is_excluded(&shown) {
                trace!("Excluded: {}", shown);
                continue;
            }

            files.push(entry.into_path());
            if max_files.is_some_and(|max| files.len() >= max) {
                debug!("Reached file limit of {}", files.len());
                break;
            }
        }
        files
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(path.metadata()?.len())
    }

    fn read(&self, path: &Path) -> io::Result<FileContent> {
        let size = self.size(path)?;
        if size >= LARGE_FILE_THRESHOLD {
            let file = File::open(path)?;
            // The map is read-only and dropped before the next batch starts.
            let mmap = unsafe { Mmap::map(&file) }?;
            return Ok(FileContent::Mapped(mmap));
        }
        Ok(FileContent::Owned(std::fs::read(path)?))
    }

    fn display_path(&self, path: &Path) -> String {
        relative_display(&self.roots, path)
    }
}

/// A [`FileStore`] held entirely in memory under a virtual root.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    root: PathBuf,
    files: DashMap<PathBuf, Vec<u8>>,
    failing: DashSet<PathBuf>,
}

impl MemoryFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: DashMap::new(),
            failing: DashSet::new(),
        }
    }

    /// Creates a store pre-populated with `(relative path, content)` pairs.
    pub fn with_files(root: impl Into<PathBuf>, files: &[(&str, &str)]) -> Self {
        let store = Self::new(root);
        for (name, content) in files {
            store.insert(name, *content);
        }
        store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds or replaces a file and returns its absolute path.
    pub fn insert(&self, relative: &str, content: impl Into<Vec<u8>>) -> PathBuf {
        let path = self.root.join(relative);
        self.files.insert(path.clone(), content.into());
        path
    }

    pub fn remove(&self, relative: &str) -> bool {
        self.files.remove(&self.root.join(relative)).is_some()
    }

    /// Makes every later `read` of this file fail with `PermissionDenied`.
    pub fn fail_reads_for(&self, relative: &str) {
        self.failing.insert(self.root.join(relative));
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileStore for MemoryFileStore {
    fn enumerate(
        &self,
        exclude: &ExcludeFilter,
        max_files: Option<usize>,
        deadline: Instant,
    ) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();

        let mut files = Vec::new();
        for path in paths {
            if max_files.is_some_and(|max| files.len() >= max) || Instant::now() >= deadline {
                break;
            }
            if !exclude.is_excluded(&self.display_path(&path)) {
                files.push(path);
            }
        }
        files
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .get(path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn read(&self, path: &Path) -> io::Result<FileContent> {
        if self.failing.contains(path) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.files
            .get(path)
            .map(|bytes| FileContent::Owned(bytes.clone()))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn display_path(&self, path: &Path) -> String {
        relative_display(std::slice::from_ref(&self.root), path)
    }
}
