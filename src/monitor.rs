//! Change monitor: keeps the indexes in agreement with the filesystem.
//!
//! Filesystem notifications, explicit triggers and shutdown requests all
//! arrive on one channel consumed by a single background thread. Events are
//! not handled per path: any burst of create/modify/remove events leads to
//! one `IndexStore::reconcile`, which diffs the whole tree and repairs only
//! the delta.
//!
//! ```text
//! UNWATCHED --start--> WATCHING --event/tick--> RECONCILING --done--> WATCHING
//!     ^                    |
//!     +-------stop---------+
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::config::WatchMode;
use crate::error::IndexError;
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Unwatched = 0,
    Watching = 1,
    Reconciling = 2,
}

impl MonitorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MonitorState::Watching,
            2 => MonitorState::Reconciling,
            _ => MonitorState::Unwatched,
        }
    }
}

#[derive(Debug)]
enum MonitorEvent {
    Fs(notify::Result<Event>),
    Reconcile,
    Shutdown,
}

/// Handle to the background monitor thread.
pub struct ChangeMonitor {
    state: Arc<AtomicU8>,
    reconciles: Arc<AtomicUsize>,
    tx: Option<Sender<MonitorEvent>>,
    watcher: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl Default for ChangeMonitor {
    fn default() -> Self {
        ChangeMonitor::new()
    }
}

impl ChangeMonitor {
    pub fn new() -> Self {
        ChangeMonitor {
            state: Arc::new(AtomicU8::new(MonitorState::Unwatched as u8)),
            reconciles: Arc::new(AtomicUsize::new(0)),
            tx: None,
            watcher: None,
            handle: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Completed reconciliation passes since start.
    pub fn reconcile_count(&self) -> usize {
        self.reconciles.load(Ordering::Acquire)
    }

    /// Subscribe to changes under the store's root (or start polling) and
    /// spawn the reconciliation thread.
    pub fn start(&mut self, store: Arc<IndexStore>) -> Result<(), IndexError> {
        if self.state() != MonitorState::Unwatched {
            return Err(IndexError::InvalidArgs("monitor already running".to_string()));
        }
        let config = store.config().clone();
        if !config.root.is_dir() {
            return Err(IndexError::DirNotFound(config.root.display().to_string()));
        }

        let (tx, rx) = mpsc::channel::<MonitorEvent>();

        if config.watch_mode == WatchMode::Events {
            let fs_tx = tx.clone();
            let mut watcher = RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = fs_tx.send(MonitorEvent::Fs(res));
                },
                Config::default(),
            )?;
            watcher.watch(&config.root, RecursiveMode::Recursive)?;
            self.watcher = Some(watcher);
        }

        self.state.store(MonitorState::Watching as u8, Ordering::Release);
        let state = Arc::clone(&self.state);
        let reconciles = Arc::clone(&self.reconciles);
        let spawned = std::thread::Builder::new()
            .name("docindex-monitor".to_string())
            .spawn(move || run_loop(&store, rx, &state, &reconciles));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.watcher = None;
                self.state.store(MonitorState::Unwatched as u8, Ordering::Release);
                return Err(e.into());
            }
        };

        info!(
            root = %config.root.display(),
            mode = ?config.watch_mode,
            poll_ms = config.poll_interval.as_millis() as u64,
            debounce_ms = config.debounce.as_millis() as u64,
            "Change monitor started"
        );
        self.tx = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the monitor thread for a reconciliation pass.
    pub fn trigger(&self) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(MonitorEvent::Reconcile).is_ok())
    }

    /// Release the subscription, let an in-flight reconciliation finish and
    /// join the thread.
    pub fn stop(&mut self) {
        // Dropping the watcher stops new filesystem events.
        self.watcher = None;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(MonitorEvent::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Change monitor thread panicked");
            }
            info!("Change monitor stopped");
        }
        self.state.store(MonitorState::Unwatched as u8, Ordering::Release);
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    store: &IndexStore,
    rx: Receiver<MonitorEvent>,
    state: &AtomicU8,
    reconciles: &AtomicUsize,
) {
    let config = store.config();
    let mut burst = Burst::default();

    loop {
        let timeout = burst
            .remaining(config.debounce, Instant::now())
            .unwrap_or(config.poll_interval);
        match rx.recv_timeout(timeout) {
            Ok(MonitorEvent::Fs(Ok(event))) => {
                if is_relevant(&event, store) {
                    debug!(kind = ?event.kind, paths = ?event.paths, "Filesystem change");
                    burst.note(Instant::now());
                }
            }
            Ok(MonitorEvent::Fs(Err(e))) => {
                warn!(error = %e, "File watcher error");
            }
            Ok(MonitorEvent::Reconcile) => {
                reconcile(store, state, reconciles);
                burst.clear();
            }
            Ok(MonitorEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Monitor loop exiting");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if burst.is_pending() || config.watch_mode == WatchMode::Poll {
                    reconcile(store, state, reconciles);
                    burst.clear();
                }
            }
        }
        // A steady event stream never lets recv_timeout expire.
        if burst.is_due(config.debounce, Instant::now()) {
            reconcile(store, state, reconciles);
            burst.clear();
        }
    }
}

/// Unreconciled changes, timed from the first one. The deadline does not
/// move when more changes arrive.
#[derive(Debug, Default)]
struct Burst {
    started: Option<Instant>,
}

impl Burst {
    fn note(&mut self, now: Instant) {
        self.started.get_or_insert(now);
    }

    fn clear(&mut self) {
        self.started = None;
    }

    fn is_pending(&self) -> bool {
        self.started.is_some()
    }

    /// Time left until the burst is due, or `None` with nothing pending.
    fn remaining(&self, debounce: Duration, now: Instant) -> Option<Duration> {
        self.started
            .map(|started| debounce.saturating_sub(now.saturating_duration_since(started)))
    }

    fn is_due(&self, debounce: Duration, now: Instant) -> bool {
        self.remaining(debounce, now) == Some(Duration::ZERO)
    }
}

fn reconcile(store: &IndexStore, state: &AtomicU8, reconciles: &AtomicUsize) {
    state.store(MonitorState::Reconciling as u8, Ordering::Release);
    if let Err(e) = store.reconcile() {
        error!(error = %e, "Reconciliation failed");
    }
    reconciles.fetch_add(1, Ordering::AcqRel);
    state.store(MonitorState::Watching as u8, Ordering::Release);
}

/// Create/modify/remove of an indexable file or of a directory. Snapshot
/// writes never qualify, even when the snapshots live inside the root.
fn is_relevant(event: &Event, store: &IndexStore) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return false;
    }
    let config = store.config();
    event.paths.iter().any(|p| {
        !is_snapshot_path(p, &config.content_snapshot)
            && !is_snapshot_path(p, &config.filename_snapshot)
            && (p.extension().is_none() || store.registry().supports(p))
    })
}

fn is_snapshot_path(path: &Path, snapshot: &Path) -> bool {
    path == snapshot
        || path
            .to_string_lossy()
            .strip_prefix(snapshot.to_string_lossy().as_ref())
            .is_some_and(|rest| rest == ".tmp")
}
