//! Store configuration: corpus root, snapshot locations, walker and monitor knobs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_SNIPPET_RADIUS, clean_path, stable_hash};

/// How the change monitor learns about filesystem changes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    /// Subscribe to filesystem notifications; reconcile after each burst of events.
    #[default]
    Events,
    /// Reconcile on every poll tick.
    Poll,
}

/// Directory walker knobs, forwarded to `ignore::WalkBuilder`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Include hidden files
    pub hidden: bool,
    /// Include .gitignore'd files
    pub no_ignore: bool,
}

impl WalkOptions {
    pub fn builder(&self, root: &Path) -> ignore::WalkBuilder {
        let mut builder = ignore::WalkBuilder::new(root);
        builder.hidden(!self.hidden);
        builder.git_ignore(!self.no_ignore);
        builder.git_global(!self.no_ignore);
        builder.git_exclude(!self.no_ignore);
        builder.ignore(!self.no_ignore);
        builder.parents(!self.no_ignore);
        builder
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexConfig {
    pub root: PathBuf,
    pub content_snapshot: PathBuf,
    pub filename_snapshot: PathBuf,
    /// Words captured on each side of an occurrence
    pub snippet_radius: usize,
    /// Bulk-index worker threads (0 = available parallelism)
    pub workers: usize,
    pub walk: WalkOptions,
    /// Multi-word phrases indexed as single terms
    pub phrases: Vec<String>,
    pub watch_mode: WatchMode,
    pub poll_interval: Duration,
    /// Delay from the first filesystem event of a burst to its reconciliation
    pub debounce: Duration,
    /// Progress is logged each time the percentage crosses a multiple of this
    pub progress_step: u8,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig::for_root(".")
    }
}

impl IndexConfig {
    /// Configuration for `root` with snapshots in the per-user data directory.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = canonical_root(root.as_ref());
        let base = index_dir();
        IndexConfig {
            content_snapshot: snapshot_path_for(&root, &base, "content"),
            filename_snapshot: snapshot_path_for(&root, &base, "filenames"),
            root,
            snippet_radius: DEFAULT_SNIPPET_RADIUS,
            workers: 4,
            walk: WalkOptions::default(),
            phrases: Vec::new(),
            watch_mode: WatchMode::Events,
            poll_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            progress_step: 10,
        }
    }

    /// Place both snapshots inside `dir` instead of the per-user data directory.
    pub fn with_snapshot_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.content_snapshot = snapshot_path_for(&self.root, dir.as_ref(), "content");
        self.filename_snapshot = snapshot_path_for(&self.root, dir.as_ref(), "filenames");
        self
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

/// Default production snapshot directory: `<data_local_dir>/docindex`.
/// Tests pass a test-local directory instead.
pub fn index_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("docindex")
}

pub fn canonical_root(root: &Path) -> PathBuf {
    let canonical = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    PathBuf::from(clean_path(&canonical.to_string_lossy()))
}

/// `<base>/<last root component>_<hash>.<ext>`
pub fn snapshot_path_for(root: &Path, base: &Path, ext: &str) -> PathBuf {
    let hash = stable_hash(&[root.to_string_lossy().as_bytes()]);
    let prefix = root
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string());
    base.join(format!("{}_{:08x}.{}", prefix, hash as u32, ext))
}
