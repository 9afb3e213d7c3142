//! Process-wide owner of the content and filename indexes.
//!
//! Created once at startup (load-or-create), shared via `Arc` with the
//! crawler, the change monitor and query engines, and flushed on shutdown.
//!
//! Locking: a document's new entries are extracted and built without any
//! lock, then swapped in while holding the content write lock, so readers see
//! either the old or the new version of a document, never a half-purged one.
//! When both locks are needed they are taken content first, filenames second.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::content::{ContentIndex, DocumentEntries};
use crate::crawler::{self, BulkReport};
use crate::error::IndexError;
use crate::extract::ExtractorRegistry;
use crate::filenames::{FilenameIndex, StaleDocument, Staleness, needs_reindexing};
use crate::tokenizer::Tokenizer;
use crate::{document_key, modified_at};

/// What happened to a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Entries replaced; `terms` distinct terms recorded
    Indexed { terms: usize },
    /// Unreadable this pass; left out of both indexes so it is retried later
    Skipped,
    /// No longer on disk; purged
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub reindexed: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.reindexed + self.removed + self.skipped == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub shards: usize,
    pub terms: usize,
    pub documents: usize,
    pub filenames: usize,
    pub generation: u64,
}

pub struct IndexStore {
    config: IndexConfig,
    tokenizer: Tokenizer,
    registry: ExtractorRegistry,
    content: RwLock<ContentIndex>,
    /// False until the content snapshot has been read into `content`
    content_resident: AtomicBool,
    filenames: RwLock<FilenameIndex>,
    /// Bumped after every successful persist
    generation: AtomicU64,
    /// Serializes bulk reindex, reconcile and persist
    maintenance: Mutex<()>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("root", &self.config.root)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl IndexStore {
    /// Load both indexes from their snapshots. Missing snapshots start empty;
    /// unreadable ones are logged and start empty so a rebuild can replace them.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        let store = Self::open_lazy(config)?;
        store.ensure_content()?;
        Ok(store)
    }

    /// Load only the filename index. The content index stays on disk until
    /// something reads or writes it through the store; query engines read
    /// single shards straight from the snapshot and never trigger the load.
    pub fn open_lazy(config: IndexConfig) -> Result<Self, IndexError> {
        let tokenizer = Tokenizer::new(&config.phrases)?;

        let filenames = match FilenameIndex::load(&config.filename_snapshot) {
            Ok(loaded) => loaded.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Filename snapshot unreadable, starting empty");
                FilenameIndex::default()
            }
        };

        info!(
            root = %config.root.display(),
            files = filenames.path_count(),
            "Index store opened"
        );

        Ok(IndexStore {
            config,
            tokenizer,
            registry: ExtractorRegistry::with_defaults(),
            content: RwLock::new(ContentIndex::default()),
            content_resident: AtomicBool::new(false),
            filenames: RwLock::new(filenames),
            generation: AtomicU64::new(0),
            maintenance: Mutex::new(()),
        })
    }

    /// Replace the extractor registry (before sharing the store).
    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether the content index has been loaded into memory.
    pub fn content_resident(&self) -> bool {
        self.content_resident.load(Ordering::Acquire)
    }

    // ─── Per-document maintenance ───────────────────────────────────

    /// Build the entries `path` would contribute, without touching the indexes.
    pub fn extract_entries(&self, path: &Path) -> Result<DocumentEntries, IndexError> {
        let segments = self.registry.extract(path, &self.tokenizer)?;
        Ok(DocumentEntries::build(&segments, &self.tokenizer, self.config.snippet_radius))
    }

    /// (Re)index one document: purge its old entries and insert the new ones
    /// atomically, and record its modification time.
    ///
    /// Extraction failures are logged and reported as `Skipped`; the document
    /// is left out of both indexes so the next reconciliation retries it.
    pub fn index_document(&self, path: &Path) -> Result<IndexOutcome, IndexError> {
        let key = document_key(path);
        let Some(modified) = modified_at(path) else {
            self.purge_document(&key)?;
            return Ok(IndexOutcome::Missing);
        };

        let entries = match self.extract_entries(path) {
            Ok(entries) => entries,
            Err(e @ (IndexError::Extraction { .. } | IndexError::Unsupported(_) | IndexError::Io(_))) => {
                let format = self.registry.for_path(path).map_or("none", |extractor| extractor.name());
                warn!(path = %key, format, error = %e, "Skipping document");
                self.purge_document(&key)?;
                return Ok(IndexOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        let terms = entries.term_count();

        let mut content = self.write_content()?;
        let mut filenames = self.write_filenames()?;
        content.replace_document(&key, entries);
        filenames.record(&key, modified);
        drop(filenames);
        drop(content);

        debug!(path = %key, terms, "Document indexed");
        Ok(IndexOutcome::Indexed { terms })
    }

    /// Remove `document` from both indexes. Returns true if anything was recorded for it.
    pub fn purge_document(&self, document: &str) -> Result<bool, IndexError> {
        let mut content = self.write_content()?;
        let mut filenames = self.write_filenames()?;
        let postings = content.remove_document(document);
        let recorded = filenames.remove(document).is_some();
        Ok(postings > 0 || recorded)
    }

    /// Bring each stale document back in line with disk.
    pub fn repair(&self, stale: &[StaleDocument]) -> Result<RepairReport, IndexError> {
        let mut report = RepairReport::default();
        for doc in stale {
            let path = Path::new(&doc.path);
            let outcome = if doc.reason == Staleness::Removed && !path.exists() {
                self.purge_document(&doc.path)?;
                IndexOutcome::Missing
            } else {
                self.index_document(path)?
            };
            match outcome {
                IndexOutcome::Indexed { .. } => report.reindexed += 1,
                IndexOutcome::Missing => {
                    info!(path = %doc.path, "Document removed from index");
                    report.removed += 1;
                }
                IndexOutcome::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Current diff between disk and the filename index.
    pub fn stale_documents(&self) -> Result<Vec<StaleDocument>, IndexError> {
        let filenames = self.read_filenames()?;
        needs_reindexing(&filenames, &self.config.root, &self.config.walk, &self.registry)
    }

    /// Diff, repair the delta and persist if anything changed.
    pub fn reconcile(&self) -> Result<RepairReport, IndexError> {
        let _guard = self.lock_maintenance()?;
        let start = Instant::now();
        let stale = self.stale_documents()?;
        if stale.is_empty() {
            debug!("Reconcile: index up to date");
            return Ok(RepairReport::default());
        }
        let report = self.repair(&stale)?;
        self.persist_locked()?;
        info!(
            reindexed = report.reindexed,
            removed = report.removed,
            skipped = report.skipped,
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Reconcile complete"
        );
        Ok(report)
    }

    /// Rebuild both indexes from scratch with the worker pool, then persist.
    pub fn reindex_all(&self) -> Result<BulkReport, IndexError> {
        let _guard = self.lock_maintenance()?;
        let report = crawler::reindex_all(self)?;
        self.persist_locked()?;
        Ok(report)
    }

    /// Full rebuild when either index is empty, otherwise reconcile.
    pub fn refresh(&self) -> Result<RepairReport, IndexError> {
        let content_empty = if self.content_resident() {
            self.read_content()?.is_empty()
        } else {
            // Reads only the snapshot header.
            ContentIndex::snapshot_shard_keys(&self.config.content_snapshot).map_or(true, |keys| keys.is_empty())
        };
        let empty = content_empty || self.read_filenames()?.is_empty();
        if empty {
            let bulk = self.reindex_all()?;
            Ok(RepairReport { reindexed: bulk.indexed, removed: 0, skipped: bulk.skipped })
        } else {
            self.reconcile()
        }
    }

    pub(crate) fn clear(&self) -> Result<(), IndexError> {
        let mut content = self
            .content
            .write()
            .map_err(|e| IndexError::LockPoisoned(format!("content index: {}", e)))?;
        let mut filenames = self.write_filenames()?;
        *content = ContentIndex::default();
        self.content_resident.store(true, Ordering::Release);
        *filenames = FilenameIndex::default();
        Ok(())
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Save both snapshots. Failures propagate so the caller can retry.
    pub fn persist(&self) -> Result<(), IndexError> {
        let _guard = self.lock_maintenance()?;
        self.persist_locked()
    }

    /// Flush on shutdown.
    pub fn close(&self) -> Result<(), IndexError> {
        self.persist()?;
        info!(root = %self.config.root.display(), "Index store closed");
        Ok(())
    }

    fn persist_locked(&self) -> Result<(), IndexError> {
        {
            let content = self.read_content()?;
            content.save(&self.config.content_snapshot)?;
        }
        {
            let filenames = self.read_filenames()?;
            filenames.save(&self.config.filename_snapshot)?;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    // ─── Read access ────────────────────────────────────────────────

    pub fn with_content<R>(&self, f: impl FnOnce(&ContentIndex) -> R) -> Result<R, IndexError> {
        Ok(f(&*self.read_content()?))
    }

    pub fn with_filenames<R>(&self, f: impl FnOnce(&FilenameIndex) -> R) -> Result<R, IndexError> {
        Ok(f(&*self.read_filenames()?))
    }

    pub fn stats(&self) -> Result<StoreStats, IndexError> {
        let content = self.read_content()?;
        let filenames = self.read_filenames()?;
        Ok(StoreStats {
            shards: content.shard_count(),
            terms: content.term_count(),
            documents: content.documents().len(),
            filenames: filenames.path_count(),
            generation: self.generation(),
        })
    }

    // ─── Lock helpers ───────────────────────────────────────────────

    /// Read the content snapshot on first use. Must not be called while
    /// holding the content lock.
    fn ensure_content(&self) -> Result<(), IndexError> {
        if self.content_resident() {
            return Ok(());
        }
        let mut content = self
            .content
            .write()
            .map_err(|e| IndexError::LockPoisoned(format!("content index: {}", e)))?;
        if self.content_resident() {
            return Ok(());
        }
        let start = Instant::now();
        *content = match ContentIndex::load(&self.config.content_snapshot) {
            Ok(loaded) => loaded.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Content snapshot unreadable, starting empty");
                ContentIndex::default()
            }
        };
        self.content_resident.store(true, Ordering::Release);
        info!(
            terms = content.term_count(),
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Content index loaded"
        );
        Ok(())
    }

    fn read_content(&self) -> Result<RwLockReadGuard<'_, ContentIndex>, IndexError> {
        self.ensure_content()?;
        self.content
            .read()
            .map_err(|e| IndexError::LockPoisoned(format!("content index: {}", e)))
    }

    fn write_content(&self) -> Result<RwLockWriteGuard<'_, ContentIndex>, IndexError> {
        self.ensure_content()?;
        self.content
            .write()
            .map_err(|e| IndexError::LockPoisoned(format!("content index: {}", e)))
    }

    fn read_filenames(&self) -> Result<RwLockReadGuard<'_, FilenameIndex>, IndexError> {
        self.filenames
            .read()
            .map_err(|e| IndexError::LockPoisoned(format!("filename index: {}", e)))
    }

    fn write_filenames(&self) -> Result<RwLockWriteGuard<'_, FilenameIndex>, IndexError> {
        self.filenames
            .write()
            .map_err(|e| IndexError::LockPoisoned(format!("filename index: {}", e)))
    }

    fn lock_maintenance(&self) -> Result<MutexGuard<'_, ()>, IndexError> {
        self.maintenance
            .lock()
            .map_err(|e| IndexError::LockPoisoned(format!("maintenance: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn setup() -> (tempfile::TempDir, PathBuf, IndexStore) {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("corpus")).unwrap();
        let root = crate::config::canonical_root(&tmp.path().join("corpus"));
        fs::write(root.join("doc1.txt"), "Cats sat on mats. Cats purred.").unwrap();
        fs::write(root.join("doc2.txt"), "Dogs barked loudly.").unwrap();
        let config = IndexConfig::for_root(&root).with_snapshot_dir(tmp.path().join("snapshots"));
        let store = IndexStore::open(config).unwrap();
        (tmp, root, store)
    }

    fn key(path: &Path) -> String {
        document_key(path)
    }

    #[test]
    fn test_index_document_records_both_stores() {
        let (_tmp, root, store) = setup();
        let doc1 = root.join("doc1.txt");
        assert_eq!(store.index_document(&doc1).unwrap(), IndexOutcome::Indexed { terms: 1 });

        let cats = store.with_content(|c| c.get("cats").cloned()).unwrap().unwrap();
        assert!(cats[&key(&doc1)].contains("Cats sat on mats Cats purred"));
        assert!(store.with_filenames(|f| f.recorded(&key(&doc1))).unwrap().is_some());
    }

    #[test]
    fn test_reindex_unchanged_document_is_idempotent() {
        let (_tmp, root, store) = setup();
        let doc1 = root.join("doc1.txt");
        store.index_document(&doc1).unwrap();
        let content = store.with_content(Clone::clone).unwrap();
        let filenames = store.with_filenames(Clone::clone).unwrap();

        store.index_document(&doc1).unwrap();
        assert_eq!(store.with_content(Clone::clone).unwrap(), content);
        assert_eq!(store.with_filenames(Clone::clone).unwrap(), filenames);
    }

    #[test]
    fn test_missing_document_is_purged() {
        let (_tmp, root, store) = setup();
        let doc2 = root.join("doc2.txt");
        store.index_document(&doc2).unwrap();
        fs::remove_file(&doc2).unwrap();
        assert_eq!(store.index_document(&doc2).unwrap(), IndexOutcome::Missing);
        assert!(!store.with_content(|c| c.contains_document(&key(&doc2))).unwrap());
    }

    #[test]
    fn test_unreadable_document_is_skipped_and_stays_stale() {
        let (_tmp, root, store) = setup();
        let bad = root.join("broken.pdf");
        fs::write(&bad, b"not a pdf").unwrap();
        assert_eq!(store.index_document(&bad).unwrap(), IndexOutcome::Skipped);

        let stale = store.stale_documents().unwrap();
        assert!(stale.iter().any(|s| s.path == key(&bad) && s.reason == Staleness::New));
    }

    #[test]
    fn test_reconcile_picks_up_modification() {
        let (_tmp, root, store) = setup();
        store.reindex_all().unwrap();
        let doc2 = root.join("doc2.txt");
        fs::write(&doc2, "Wolves howled.").unwrap();
        let file = fs::File::options().write(true).open(&doc2).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();

        let report = store.reconcile().unwrap();
        assert_eq!(report, RepairReport { reindexed: 1, removed: 0, skipped: 0 });
        assert!(store.with_content(|c| c.get("dogs").is_none()).unwrap());
        assert!(store.with_content(|c| c.get("wolves").is_some()).unwrap());
    }

    #[test]
    fn test_reconcile_tombstone() {
        let (_tmp, root, store) = setup();
        store.reindex_all().unwrap();
        let doc2 = root.join("doc2.txt");
        fs::remove_file(&doc2).unwrap();

        let stale = store.stale_documents().unwrap();
        assert_eq!(stale, vec![StaleDocument { path: key(&doc2), reason: Staleness::Removed }]);

        let report = store.reconcile().unwrap();
        assert_eq!(report.removed, 1);
        assert!(!store.with_content(|c| c.contains_document(&key(&doc2))).unwrap());
        assert!(store.with_filenames(|f| f.get("doc2.txt").is_none()).unwrap());
        assert!(store.stale_documents().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_without_changes_does_not_persist() {
        let (_tmp, _root, store) = setup();
        store.reindex_all().unwrap();
        let generation = store.generation();
        assert!(store.reconcile().unwrap().is_empty());
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn test_reopen_restores_from_snapshots() {
        let (_tmp, _root, store) = setup();
        store.reindex_all().unwrap();
        let content = store.with_content(Clone::clone).unwrap();
        let filenames = store.with_filenames(Clone::clone).unwrap();
        let config = store.config().clone();
        store.close().unwrap();

        let reopened = IndexStore::open(config).unwrap();
        assert_eq!(reopened.with_content(Clone::clone).unwrap(), content);
        assert_eq!(reopened.with_filenames(Clone::clone).unwrap(), filenames);
    }

    #[test]
    fn test_refresh_builds_when_empty() {
        let (_tmp, _root, store) = setup();
        let report = store.refresh().unwrap();
        assert_eq!(report.reindexed, 2);
        assert_eq!(store.stats().unwrap().documents, 2);
        assert!(store.config().content_snapshot.exists());
    }

    #[test]
    fn test_persist_failure_propagates() {
        let (tmp, _root, store) = setup();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let mut config = store.config().clone();
        config.content_snapshot = blocker.join("index.content");
        let store = IndexStore::open(config).unwrap();
        let err = store.persist().unwrap_err();
        assert!(matches!(err, IndexError::SnapshotSave { .. }));
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_corrupt_snapshot_opens_empty() {
        let (_tmp, _root, store) = setup();
        let config = store.config().clone();
        fs::create_dir_all(config.content_snapshot.parent().unwrap()).unwrap();
        fs::write(&config.content_snapshot, b"garbage garbage garbage").unwrap();
        let store = IndexStore::open(config).unwrap();
        assert_eq!(store.stats().unwrap().terms, 0);
    }

    #[test]
    fn test_garbage_filename_snapshot_opens_empty() {
        let (_tmp, _root, store) = setup();
        let config = store.config().clone();
        fs::create_dir_all(config.filename_snapshot.parent().unwrap()).unwrap();
        fs::write(&config.filename_snapshot, b"this is not valid data at all!!!!!").unwrap();

        let store = IndexStore::open(config).unwrap();
        assert_eq!(store.stats().unwrap().filenames, 0);
        assert_eq!(store.stale_documents().unwrap().len(), 2);
    }

    #[test]
    fn test_lazy_open_defers_content_load() {
        let (_tmp, root, store) = setup();
        store.reindex_all().unwrap();
        let config = store.config().clone();
        store.close().unwrap();

        let store = Arc::new(IndexStore::open_lazy(config).unwrap());
        assert!(!store.content_resident());
        let mut engine = crate::query::QueryEngine::new(Arc::clone(&store));
        assert_eq!(engine.query_exact("cats").unwrap().len(), 1);
        assert_eq!(engine.query_filename("doc1.txt").unwrap(), vec![key(&root.join("doc1.txt"))]);
        assert!(store.stale_documents().unwrap().is_empty());
        assert!(!store.content_resident());

        assert_eq!(store.stats().unwrap().documents, 2);
        assert!(store.content_resident());
    }

    #[test]
    fn test_refresh_after_lazy_open_stays_lazy_when_up_to_date() {
        let (_tmp, root, store) = setup();
        store.reindex_all().unwrap();
        let config = store.config().clone();
        store.close().unwrap();

        let store = IndexStore::open_lazy(config.clone()).unwrap();
        assert!(store.refresh().unwrap().is_empty());
        assert!(!store.content_resident());

        fs::write(root.join("doc3.txt"), "Owls hooted.").unwrap();
        assert_eq!(store.refresh().unwrap().reindexed, 1);
        assert!(store.content_resident());
        assert!(store.with_content(|c| c.get("owls").is_some()).unwrap());
    }

    #[test]
    fn test_persist_after_lazy_open_keeps_content() {
        let (_tmp, _root, store) = setup();
        store.reindex_all().unwrap();
        let content = store.with_content(Clone::clone).unwrap();
        let config = store.config().clone();
        store.close().unwrap();

        let lazy = IndexStore::open_lazy(config.clone()).unwrap();
        lazy.persist().unwrap();
        assert!(lazy.content_resident());

        let reopened = IndexStore::open(config).unwrap();
        assert_eq!(reopened.with_content(Clone::clone).unwrap(), content);
    }
}
