//! Bulk indexing: one unit of work per immediate subdirectory of the root,
//! drained by a fixed pool of worker threads. Files directly under the root
//! are indexed by the coordinating thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::IndexError;
use crate::filenames::walk_documents;
use crate::store::{IndexOutcome, IndexStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// Indexable files found before indexing started
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Processed-file counter reported as a percentage of a precomputed total.
/// Observational only.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    step: usize,
    processed: AtomicUsize,
    reported: AtomicUsize,
}

impl Progress {
    pub fn new(total: usize, step: u8) -> Self {
        Progress {
            total,
            step: usize::from(step.clamp(1, 100)),
            processed: AtomicUsize::new(0),
            reported: AtomicUsize::new(0),
        }
    }

    /// Count one file; logs each time the percentage crosses a step boundary.
    pub fn tick(&self) -> usize {
        let done = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let percent = self.percent_of(done);
        let bucket = percent / self.step;
        if bucket > 0 && self.reported.fetch_max(bucket, Ordering::Relaxed) < bucket {
            info!(percent, processed = done, total = self.total, "Indexing progress");
        }
        done
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn percent(&self) -> usize {
        self.percent_of(self.processed())
    }

    fn percent_of(&self, done: usize) -> usize {
        if self.total == 0 {
            100
        } else {
            (done * 100 / self.total).min(100)
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    indexed: usize,
    skipped: usize,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.indexed += other.indexed;
        self.skipped += other.skipped;
    }
}

/// Immediate subdirectories (work units) and root-level files, honouring the
/// walker's ignore rules.
fn partition(store: &IndexStore) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let config = store.config();
    let mut subdirs = Vec::new();
    let mut root_files = Vec::new();
    let mut builder = config.walk.builder(&config.root);
    builder.max_depth(Some(1));
    for entry in builder.build().flatten() {
        if entry.depth() == 0 {
            continue;
        }
        match entry.file_type() {
            Some(ft) if ft.is_dir() => subdirs.push(entry.into_path()),
            Some(ft) if ft.is_file() && store.registry().supports(entry.path()) => {
                root_files.push(entry.into_path())
            }
            _ => {}
        }
    }
    (subdirs, root_files)
}

fn index_one(store: &IndexStore, path: &Path, progress: &Progress, tally: &mut Tally) -> Result<(), IndexError> {
    match store.index_document(path)? {
        IndexOutcome::Indexed { .. } => tally.indexed += 1,
        IndexOutcome::Skipped | IndexOutcome::Missing => tally.skipped += 1,
    }
    progress.tick();
    Ok(())
}

fn run_worker(
    store: &IndexStore,
    queue: &Mutex<VecDeque<PathBuf>>,
    progress: &Progress,
) -> Result<Tally, IndexError> {
    let config = store.config();
    let mut tally = Tally::default();
    loop {
        let next = queue
            .lock()
            .map_err(|e| IndexError::LockPoisoned(format!("work queue: {}", e)))?
            .pop_front();
        let Some(dir) = next else { break };
        let files = match walk_documents(&dir, &config.walk, store.registry()) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping subdirectory");
                continue;
            }
        };
        for (path, _) in files {
            index_one(store, &path, progress, &mut tally)?;
        }
    }
    Ok(tally)
}

/// Clear both indexes and rebuild them from every document under the root.
/// Persisting is left to the caller.
pub fn reindex_all(store: &IndexStore) -> Result<BulkReport, IndexError> {
    let config = store.config();
    let start = Instant::now();

    let total = walk_documents(&config.root, &config.walk, store.registry())?.len();
    let (subdirs, root_files) = partition(store);
    let workers = config.worker_count().min(subdirs.len()).max(1);
    info!(
        root = %config.root.display(),
        files = total,
        subdirs = subdirs.len(),
        workers,
        "Bulk indexing started"
    );

    store.clear()?;
    let progress = Progress::new(total, config.progress_step);
    let queue = Mutex::new(VecDeque::from(subdirs));

    let tally = std::thread::scope(|s| -> Result<Tally, IndexError> {
        let handles: Vec<_> = (0..workers)
            .map(|_| s.spawn(|| run_worker(store, &queue, &progress)))
            .collect();

        let mut tally = Tally::default();
        for path in &root_files {
            index_one(store, path, &progress, &mut tally)?;
        }

        for handle in handles {
            let worker = handle
                .join()
                .map_err(|_| IndexError::LockPoisoned("indexing worker panicked".to_string()))??;
            tally.add(worker);
        }
        Ok(tally)
    })?;

    let report = BulkReport {
        total,
        indexed: tally.indexed,
        skipped: tally.skipped,
        elapsed: start.elapsed(),
    };
    info!(
        indexed = report.indexed,
        skipped = report.skipped,
        elapsed_ms = format_args!("{:.1}", report.elapsed.as_secs_f64() * 1000.0),
        "Bulk indexing complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use std::fs;

    fn corpus_store(workers: usize) -> (tempfile::TempDir, PathBuf, IndexStore) {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("corpus")).unwrap();
        let root = crate::config::canonical_root(&tmp.path().join("corpus"));
        fs::write(root.join("top.txt"), "Station Alpha reporting.").unwrap();
        for (dir, n) in [("north", 3), ("south", 2), ("east/deep/er", 4)] {
            let d = root.join(dir);
            fs::create_dir_all(&d).unwrap();
            for i in 0..n {
                fs::write(d.join(format!("f{}.txt", i)), format!("Report {} from Region {}", i, dir)).unwrap();
            }
        }
        fs::write(root.join("north").join("table.csv"), "City,Population\nOslo,700000\n").unwrap();
        fs::write(root.join("south").join("ignored.bin"), [1u8, 2, 3]).unwrap();
        let mut config = IndexConfig::for_root(&root).with_snapshot_dir(tmp.path().join("snap"));
        config.workers = workers;
        let store = IndexStore::open(config).unwrap();
        (tmp, root, store)
    }

    #[test]
    fn test_progress_percent() {
        let progress = Progress::new(4, 25);
        assert_eq!(progress.percent(), 0);
        progress.tick();
        assert_eq!(progress.percent(), 25);
        for _ in 0..3 {
            progress.tick();
        }
        assert_eq!(progress.percent(), 100);
        assert_eq!(progress.processed(), 4);
    }

    #[test]
    fn test_progress_empty_total() {
        assert_eq!(Progress::new(0, 10).percent(), 100);
    }

    #[test]
    fn test_partition_root_files_and_subdirs() {
        let (_tmp, root, store) = corpus_store(2);
        let (mut subdirs, root_files) = partition(&store);
        subdirs.sort();
        assert_eq!(subdirs, vec![root.join("east"), root.join("north"), root.join("south")]);
        assert_eq!(root_files, vec![root.join("top.txt")]);
    }

    #[test]
    fn test_reindex_all_indexes_every_file() {
        let (_tmp, _root, store) = corpus_store(3);
        let report = reindex_all(&store).unwrap();
        assert_eq!(report.total, 11);
        assert_eq!(report.indexed, 11);
        assert_eq!(report.skipped, 0);
        let stats = store.stats().unwrap();
        assert_eq!(stats.documents, 11);
        assert_eq!(stats.filenames, 11);
        assert!(store.with_content(|c| c.get("oslo").is_some()).unwrap());
    }

    #[test]
    fn test_result_independent_of_worker_count() {
        let (_t1, _r1, one) = corpus_store(1);
        reindex_all(&one).unwrap();
        let (_t2, _r2, many) = corpus_store(8);
        reindex_all(&many).unwrap();

        let terms = |s: &IndexStore| {
            s.with_content(|c| {
                let mut terms: Vec<String> = c
                    .shard_keys()
                    .flat_map(|k| c.shard(k).unwrap().terms().cloned().collect::<Vec<_>>())
                    .collect();
                terms.sort();
                terms
            })
            .unwrap()
        };
        assert_eq!(terms(&one), terms(&many));
    }

    #[test]
    fn test_reindex_all_drops_entries_of_deleted_files() {
        let (_tmp, root, store) = corpus_store(2);
        reindex_all(&store).unwrap();
        fs::remove_file(root.join("top.txt")).unwrap();
        reindex_all(&store).unwrap();
        assert!(store.with_content(|c| c.get("alpha").is_none()).unwrap());
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = IndexConfig::for_root(tmp.path().join("absent")).with_snapshot_dir(tmp.path());
        let store = IndexStore::open(config).unwrap();
        assert!(matches!(reindex_all(&store), Err(IndexError::DirNotFound(_))));
    }
}
