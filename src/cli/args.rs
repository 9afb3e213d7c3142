//! CLI argument structs for all subcommands.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use docindex::{IndexConfig, WalkOptions, WatchMode};

/// Options shared by every subcommand: which corpus, where its snapshots live,
/// and how documents are tokenized.
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Corpus root directory
    #[arg(short, long, default_value = ".")]
    pub dir: String,

    /// Content snapshot path (default: per-user data dir, derived from --dir)
    #[arg(long)]
    pub content_snapshot: Option<PathBuf>,

    /// Filename snapshot path (default: per-user data dir, derived from --dir)
    #[arg(long)]
    pub filename_snapshot: Option<PathBuf>,

    /// Number of bulk-indexing worker threads (0 = auto)
    #[arg(short, long, default_value = "4")]
    pub workers: usize,

    /// Words captured on each side of a term in snippets
    #[arg(long, default_value = "5")]
    pub radius: usize,

    /// Multi-word phrase to index as a single term (repeatable)
    #[arg(long, action = clap::ArgAction::Append)]
    pub phrase: Vec<String>,

    /// Include hidden files
    #[arg(long)]
    pub hidden: bool,

    /// Include .gitignore'd files
    #[arg(long)]
    pub no_ignore: bool,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl CommonArgs {
    pub fn to_config(&self) -> IndexConfig {
        let mut config = IndexConfig::for_root(&self.dir);
        if let Some(path) = &self.content_snapshot {
            config.content_snapshot = path.clone();
        }
        if let Some(path) = &self.filename_snapshot {
            config.filename_snapshot = path.clone();
        }
        config.workers = self.workers;
        config.snippet_radius = self.radius;
        config.phrases = self.phrase.clone();
        config.walk = WalkOptions {
            hidden: self.hidden,
            no_ignore: self.no_ignore,
        };
        config
    }
}

#[derive(Parser, Debug)]
pub struct IndexArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    /// Only list stale documents, do not repair
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Poll the tree on a fixed interval instead of subscribing to events
    #[arg(long)]
    pub poll: bool,

    /// Poll interval in seconds
    #[arg(long, default_value = "5")]
    pub poll_secs: u64,

    /// Quiet period after the last filesystem event before reconciling (ms)
    #[arg(long, default_value = "500")]
    pub debounce_ms: u64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl WatchArgs {
    pub fn to_config(&self) -> IndexConfig {
        let mut config = self.common.to_config();
        config.watch_mode = if self.poll { WatchMode::Poll } else { WatchMode::Events };
        config.poll_interval = Duration::from_secs(self.poll_secs.max(1));
        config.debounce = Duration::from_millis(self.debounce_ms);
        config
    }
}

#[derive(Parser, Debug)]
pub struct GrepArgs {
    /// Term to look up (regex with --regex)
    pub term: String,

    /// Treat the term as a case-insensitive regular expression
    #[arg(short, long)]
    pub regex: bool,

    /// With --regex, search every shard instead of the one the pattern starts with
    #[arg(long, requires = "regex")]
    pub all_shards: bool,

    /// Skip the startup freshness check against the filesystem
    #[arg(long)]
    pub no_refresh: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct FilesArgs {
    /// File name to look up (regex with --regex)
    pub name: String,

    /// Treat the name as a case-insensitive regular expression
    #[arg(short, long)]
    pub regex: bool,

    /// Skip the startup freshness check against the filesystem
    #[arg(long)]
    pub no_refresh: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}
