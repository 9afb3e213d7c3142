//! # docindex: sharded document index
//!
//! Inverted index over a directory tree of plain-text, delimited-table and PDF
//! documents. Terms are filtered by a noun heuristic, every occurrence records
//! a snippet of surrounding words, and the index is sharded by the leading
//! character of each term so queries only ever materialize one shard.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use docindex::{IndexConfig, IndexStore, QueryEngine};
//!
//! let config = IndexConfig::for_root("./corpus");
//! let store = Arc::new(IndexStore::open(config)?);
//! store.reindex_all()?;
//!
//! let mut engine = QueryEngine::new(Arc::clone(&store));
//! for (doc, snippets) in engine.query_exact("cats")? {
//!     println!("{doc}: {snippets:?}");
//! }
//! # Ok::<(), docindex::IndexError>(())
//! ```

use std::path::Path;
use std::time::UNIX_EPOCH;

pub mod config;
pub mod content;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod filenames;
pub mod monitor;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod tokenizer;

pub use config::{IndexConfig, WalkOptions, WatchMode};
pub use content::{ContentIndex, DocumentEntries, Shard};
pub use crawler::{BulkReport, reindex_all};
pub use error::IndexError;
pub use extract::{Extractor, ExtractorRegistry};
pub use filenames::{FilenameIndex, StaleDocument, Staleness, index_filenames, needs_reindexing};
pub use monitor::{ChangeMonitor, MonitorState};
pub use query::{DocumentHits, QueryEngine, TermHits};
pub use store::{IndexStore, RepairReport, StoreStats};
pub use tokenizer::{NounFilter, Tokenizer};

/// Default number of words captured on each side of an indexed occurrence.
pub const DEFAULT_SNIPPET_RADIUS: usize = 5;

/// Modification time in nanoseconds since the Unix epoch.
pub type Timestamp = u64;

// ─── Stable hashing ─────────────────────────────────────────────────

/// Stable FNV-1a hash (deterministic across Rust versions, unlike `DefaultHasher`).
///
/// Used to derive snapshot file names from the canonical corpus root.
#[must_use]
pub fn stable_hash(parts: &[&[u8]]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = FNV_OFFSET;
    for part in parts {
        for &byte in *part {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

// ─── Path and file helpers ──────────────────────────────────────────

/// Strip the `\\?\` extended-length path prefix that Windows canonicalize adds.
#[must_use]
pub fn clean_path(p: &str) -> String {
    p.strip_prefix(r"\\?\").unwrap_or(p).to_string()
}

/// Canonical string form of a document path, used as the document key in both indexes.
#[must_use]
pub fn document_key(path: &Path) -> String {
    clean_path(&path.to_string_lossy())
}

/// Read a file as a String, using lossy UTF-8 conversion for non-UTF8 files.
/// Returns `(content, was_lossy)` where `was_lossy` is true if replacement characters
/// were inserted.
pub fn read_file_lossy(path: &Path) -> std::io::Result<(String, bool)> {
    let raw = std::fs::read(path)?;
    match String::from_utf8(raw) {
        Ok(s) => Ok((s, false)),
        Err(e) => Ok((String::from_utf8_lossy(e.as_bytes()).into_owned(), true)),
    }
}

/// Modification time of `path`, or `None` if it no longer exists.
pub fn modified_at(path: &Path) -> Option<Timestamp> {
    let metadata = std::fs::metadata(path).ok()?;
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as Timestamp)
        .or(Some(0))
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_clean_path_strips_prefix() {
        assert_eq!(clean_path(r"\\?\C:\Users\test"), r"C:\Users\test");
    }

    #[test]
    fn test_clean_path_no_prefix() {
        assert_eq!(clean_path("/srv/corpus/doc1.txt"), "/srv/corpus/doc1.txt");
    }

    #[test]
    fn test_stable_hash_deterministic() {
        let a = stable_hash(&[b"/srv/corpus"]);
        let b = stable_hash(&[b"/srv/corpus"]);
        assert_eq!(a, b, "same input must produce same hash");
    }

    #[test]
    fn test_stable_hash_multi_part_equivalent_to_concat() {
        let split = stable_hash(&[b"hello", b"world"]);
        let concat = stable_hash(&[b"helloworld"]);
        assert_eq!(split, concat);
    }

    #[test]
    fn test_stable_hash_known_fnv1a_vector() {
        assert_eq!(stable_hash(&[]), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_read_file_lossy_replaces_invalid_utf8() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 Menu").unwrap();
        let (content, lossy) = read_file_lossy(&path).unwrap();
        assert!(lossy);
        assert!(content.ends_with("Menu"));
    }

    #[test]
    fn test_modified_at_missing_file() {
        assert_eq!(modified_at(Path::new("/nonexistent/doc.txt")), None);
    }

    #[test]
    fn test_modified_at_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.txt");
        std::fs::write(&path, "Cats").unwrap();
        assert!(modified_at(&path).is_some_and(|t| t > 0));
    }
}
