//! Filename index: lower-cased basename → {path → modification time}.
//!
//! Besides answering filename queries, it is the record of which version of
//! every document was indexed, and `needs_reindexing` diffs it against disk.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::WalkOptions;
use crate::error::IndexError;
use crate::extract::ExtractorRegistry;
use crate::snapshot::{load_compressed, save_compressed};
use crate::{Timestamp, document_key, modified_at};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameIndex {
    names: HashMap<String, BTreeMap<String, Timestamp>>,
}

/// Lower-cased basename of `path`.
pub fn normalized_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_lowercase())
}

impl FilenameIndex {
    /// Record `path` at `modified`, replacing any earlier timestamp for it.
    pub fn record(&mut self, path: &str, modified: Timestamp) {
        let Some(name) = normalized_name(Path::new(path)) else { return };
        self.names.entry(name).or_default().insert(path.to_string(), modified);
    }

    /// Forget `path`. Returns its recorded timestamp, if any.
    pub fn remove(&mut self, path: &str) -> Option<Timestamp> {
        let name = normalized_name(Path::new(path))?;
        let entries = self.names.get_mut(&name)?;
        let removed = entries.remove(path);
        if entries.is_empty() {
            self.names.remove(&name);
        }
        removed
    }

    pub fn recorded(&self, path: &str) -> Option<Timestamp> {
        let name = normalized_name(Path::new(path))?;
        self.names.get(&name)?.get(path).copied()
    }

    /// Paths recorded under `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&BTreeMap<String, Timestamp>> {
        self.names.get(&name.to_lowercase())
    }

    /// Names matching `pattern`, with their recorded paths.
    pub fn matching<'a>(
        &'a self,
        pattern: &'a Regex,
    ) -> impl Iterator<Item = (&'a String, &'a BTreeMap<String, Timestamp>)> + 'a {
        self.names.iter().filter(|(name, _)| pattern.is_match(name))
    }

    /// Every recorded (path, timestamp).
    pub fn entries(&self) -> impl Iterator<Item = (&String, Timestamp)> {
        self.names.values().flat_map(|m| m.iter().map(|(p, t)| (p, *t)))
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn path_count(&self) -> usize {
        self.names.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        save_compressed(path, self, "filename-index")
    }

    /// `Ok(None)` if no snapshot exists.
    pub fn load(path: &Path) -> Result<Option<FilenameIndex>, IndexError> {
        load_compressed(path, "filename-index")
    }
}

// ─── Walking and diffing ─────────────────────────────────────────────

/// Files under `root` that some extractor can read, with their modification times.
pub fn walk_documents(
    root: &Path,
    walk: &WalkOptions,
    registry: &ExtractorRegistry,
) -> Result<Vec<(PathBuf, Timestamp)>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::DirNotFound(root.display().to_string()));
    }
    let mut found = Vec::new();
    for result in walk.builder(root).build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) || !registry.supports(entry.path()) {
            continue;
        }
        // Vanished between listing and stat.
        let Some(modified) = modified_at(entry.path()) else { continue };
        found.push((entry.into_path(), modified));
    }
    Ok(found)
}

/// Record every indexable file under `root`.
pub fn index_filenames(
    root: &Path,
    walk: &WalkOptions,
    registry: &ExtractorRegistry,
) -> Result<FilenameIndex, IndexError> {
    let mut index = FilenameIndex::default();
    for (path, modified) in walk_documents(root, walk, registry)? {
        index.record(&document_key(&path), modified);
    }
    Ok(index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Staleness {
    /// On disk, never indexed
    New,
    /// On disk with a different modification time than recorded
    Modified,
    /// Recorded but gone from disk
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StaleDocument {
    pub path: String,
    pub reason: Staleness,
}

/// Diff the filesystem under `root` against `index`. No side effects; the
/// result is sorted by path.
pub fn needs_reindexing(
    index: &FilenameIndex,
    root: &Path,
    walk: &WalkOptions,
    registry: &ExtractorRegistry,
) -> Result<Vec<StaleDocument>, IndexError> {
    let on_disk: HashMap<String, Timestamp> = walk_documents(root, walk, registry)?
        .into_iter()
        .map(|(path, modified)| (document_key(&path), modified))
        .collect();

    let mut stale = Vec::new();
    for (path, &modified) in &on_disk {
        let reason = match index.recorded(path) {
            None => Staleness::New,
            Some(recorded) if recorded != modified => Staleness::Modified,
            Some(_) => continue,
        };
        stale.push(StaleDocument { path: path.clone(), reason });
    }
    for (path, _) in index.entries() {
        if !on_disk.contains_key(path.as_str()) {
            stale.push(StaleDocument { path: path.clone(), reason: Staleness::Removed });
        }
    }
    stale.sort();
    debug!(stale = stale.len(), "Filesystem diff computed");
    Ok(stale)
}
