//! watch command: bring the indexes up to date, then keep them current until Ctrl-C.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use tracing::{info, warn};

use docindex::{ChangeMonitor, IndexError, IndexStore};

use super::args::WatchArgs;

pub fn cmd_watch(args: WatchArgs) -> Result<(), IndexError> {
    let config = args.to_config();
    info!(dir = %config.root.display(), mode = ?config.watch_mode, "Starting watch");

    let store = Arc::new(IndexStore::open(config)?);

    // Startup policy: full rebuild if either index is empty, else repair the delta.
    let start = Instant::now();
    let report = store.refresh()?;
    info!(
        reindexed = report.reindexed,
        removed = report.removed,
        skipped = report.skipped,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Indexes ready"
    );

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;

    let mut monitor = ChangeMonitor::new();
    monitor.start(Arc::clone(&store))?;
    eprintln!("Watching {} (Ctrl-C to stop)", store.config().root.display());

    if rx.recv().is_err() {
        warn!("Signal channel closed");
    }

    info!("Shutting down");
    monitor.stop();
    store.close()
}
