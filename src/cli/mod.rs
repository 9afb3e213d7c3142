//! CLI layer: argument parsing, command dispatch, and subcommand implementations.

pub mod args;
mod info;
mod watch;

pub use args::*;
pub use info::cmd_info_json;

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docindex::{DocumentHits, IndexError, IndexStore, QueryEngine, TermHits};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Sharded inverted index over text, table and PDF documents
#[derive(Parser, Debug)]
#[command(name = "docindex", version, about, after_help = "\
Run 'docindex <COMMAND> --help' for detailed options and examples.\n\
Common options: -d <DIR> (corpus root), --phrase <TEXT> (multi-word term), --json")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Rebuild both indexes from scratch with the worker pool
    Index(IndexArgs),

    /// Diff the filesystem against the filename index and repair the delta
    Reconcile(ReconcileArgs),

    /// Keep the indexes current until Ctrl-C
    Watch(WatchArgs),

    /// Look up a term (or pattern) in the content index
    Grep(GrepArgs),

    /// Look up a file name (or pattern) in the filename index
    Files(FilesArgs),

    /// Show index statistics and snapshot locations
    Info(InfoArgs),
}

impl Commands {
    pub(crate) fn common(&self) -> &CommonArgs {
        match self {
            Commands::Index(a) => &a.common,
            Commands::Reconcile(a) => &a.common,
            Commands::Watch(a) => &a.common,
            Commands::Grep(a) => &a.common,
            Commands::Files(a) => &a.common,
            Commands::Info(a) => &a.common,
        }
    }
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();
    init_logging(&cli.command.common().log_level);

    let result = match cli.command {
        Commands::Index(args) => cmd_index(args),
        Commands::Reconcile(args) => cmd_reconcile(args),
        Commands::Watch(args) => watch::cmd_watch(args),
        Commands::Grep(args) => cmd_grep(args),
        Commands::Files(args) => cmd_files(args),
        Commands::Info(args) => info::cmd_info(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// RUST_LOG wins over `--log-level`. Logs go to stderr so stdout stays
/// clean for results.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), IndexError> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(std::io::Error::other)?;
    writeln!(out)?;
    Ok(())
}

// ─── Maintenance commands ───────────────────────────────────────────

pub(crate) fn cmd_index(args: IndexArgs) -> Result<(), IndexError> {
    let store = IndexStore::open(args.common.to_config())?;
    let report = store.reindex_all()?;
    if args.common.json {
        return print_json(&report);
    }
    eprintln!(
        "Indexed {} of {} files ({} skipped) in {:.1}s",
        report.indexed,
        report.total,
        report.skipped,
        report.elapsed.as_secs_f64()
    );
    eprintln!("Content snapshot: {}", store.config().content_snapshot.display());
    Ok(())
}

pub(crate) fn cmd_reconcile(args: ReconcileArgs) -> Result<(), IndexError> {
    let store = IndexStore::open(args.common.to_config())?;
    let stale = store.stale_documents()?;

    if args.dry_run {
        if args.common.json {
            return print_json(&stale);
        }
        for doc in &stale {
            println!("{:?}\t{}", doc.reason, doc.path);
        }
        eprintln!("{} stale document(s)", stale.len());
        return Ok(());
    }

    let report = store.reconcile()?;
    if args.common.json {
        return print_json(&report);
    }
    if report.is_empty() {
        eprintln!("Index is up to date.");
    } else {
        eprintln!(
            "Reindexed {}, removed {}, skipped {}",
            report.reindexed, report.removed, report.skipped
        );
    }
    Ok(())
}

// ─── Query commands ─────────────────────────────────────────────────

/// Open the store and bring it in line with disk unless told not to. The
/// content index is left on disk; queries load one shard at a time.
pub(crate) fn open_for_query(common: &CommonArgs, no_refresh: bool) -> Result<Arc<IndexStore>, IndexError> {
    let store = Arc::new(IndexStore::open_lazy(common.to_config())?);
    if !no_refresh {
        store.refresh()?;
    }
    Ok(store)
}

pub(crate) fn cmd_grep(args: GrepArgs) -> Result<(), IndexError> {
    let store = open_for_query(&args.common, args.no_refresh)?;
    let mut engine = QueryEngine::new(store);

    if args.regex {
        let hits = if args.all_shards {
            engine.query_pattern_all_shards(&args.term)?
        } else {
            engine.query_pattern(&args.term)?
        };
        if args.common.json {
            return print_json(&hits);
        }
        print_term_hits(&hits);
        eprintln!("{} matching term(s)", hits.len());
    } else {
        let hits = engine.query_exact(&args.term)?;
        if args.common.json {
            return print_json(&hits);
        }
        print_document_hits(&hits, "");
        eprintln!("{} document(s)", hits.len());
    }
    Ok(())
}

pub(crate) fn cmd_files(args: FilesArgs) -> Result<(), IndexError> {
    let store = open_for_query(&args.common, args.no_refresh)?;
    let engine = QueryEngine::new(store);

    if args.regex {
        let hits = engine.query_filename_pattern(&args.name)?;
        if args.common.json {
            return print_json(&hits);
        }
        for paths in hits.values() {
            for path in paths {
                println!("{}", path);
            }
        }
        eprintln!("{} matching name(s)", hits.len());
    } else {
        let paths = engine.query_filename(&args.name)?;
        if args.common.json {
            return print_json(&paths);
        }
        for path in &paths {
            println!("{}", path);
        }
        eprintln!("{} file(s)", paths.len());
    }
    Ok(())
}

fn print_document_hits(hits: &DocumentHits, indent: &str) {
    for (doc, snippets) in hits {
        println!("{}{}", indent, doc);
        for snippet in snippets {
            println!("{}    {}", indent, snippet);
        }
    }
}

fn print_term_hits(hits: &TermHits) {
    for (term, docs) in hits {
        println!("{}:", term);
        print_document_hits(docs, "  ");
    }
}
