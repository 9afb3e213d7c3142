//! info command: store statistics and snapshot files.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use docindex::{ContentIndex, IndexError, IndexStore};

use super::args::InfoArgs;
use super::print_json;

pub fn cmd_info(args: InfoArgs) -> Result<(), IndexError> {
    let store = IndexStore::open(args.common.to_config())?;
    let info = cmd_info_json(&store)?;
    if args.common.json {
        return print_json(&info);
    }

    let stats = store.stats()?;
    let config = store.config();
    println!("Root: {}", config.root.display());
    println!(
        "  {} documents, {} terms in {} shards, {} file names",
        stats.documents, stats.terms, stats.shards, stats.filenames
    );
    for (label, path) in [("CONTENT", &config.content_snapshot), ("FILES", &config.filename_snapshot)] {
        match snapshot_file_info(path) {
            Some((size, age_hours)) => println!(
                "  [{}] {} -- {:.1} MB, {:.1}h ago",
                label,
                path.display(),
                size as f64 / 1_048_576.0,
                age_hours
            ),
            None => println!("  [{}] {} -- missing", label, path.display()),
        }
    }
    match info["stale"].as_u64() {
        Some(0) => println!("  Up to date with the filesystem."),
        Some(n) => println!("  {} stale document(s); run 'docindex reconcile'.", n),
        None => println!("  Corpus root is not readable."),
    }
    Ok(())
}

/// Size in bytes and age in hours of a snapshot file.
fn snapshot_file_info(path: &Path) -> Option<(u64, f64)> {
    let meta = fs::metadata(path).ok()?;
    let age_hours = meta
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map(|d| d.as_secs_f64() / 3600.0)
        .unwrap_or(0.0);
    Some((meta.len(), age_hours))
}

/// Store statistics as a JSON value.
pub fn cmd_info_json(store: &IndexStore) -> Result<serde_json::Value, IndexError> {
    let stats = store.stats()?;
    let config = store.config();
    let snapshot = |path: &Path| match snapshot_file_info(path) {
        Some((size, age_hours)) => serde_json::json!({
            "path": path.display().to_string(),
            "sizeMb": (size as f64 / 1_048_576.0 * 10.0).round() / 10.0,
            "ageHours": (age_hours * 10.0).round() / 10.0,
        }),
        None => serde_json::json!({ "path": path.display().to_string(), "missing": true }),
    };
    let shard_keys: String = ContentIndex::snapshot_shard_keys(&config.content_snapshot)
        .unwrap_or_default()
        .into_iter()
        .collect();
    let stale = store.stale_documents().ok().map(|s| s.len());

    Ok(serde_json::json!({
        "root": config.root.display().to_string(),
        "documents": stats.documents,
        "terms": stats.terms,
        "shards": stats.shards,
        "shardKeys": shard_keys,
        "filenames": stats.filenames,
        "stale": stale,
        "contentSnapshot": snapshot(&config.content_snapshot),
        "filenameSnapshot": snapshot(&config.filename_snapshot),
    }))
}
