//! Unified error type for indexing, persistence and query operations.

use thiserror::Error;

/// All errors that can occur in index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error (file read/write, directory access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Corpus root does not exist
    #[error("Directory does not exist: {0}")]
    DirNotFound(String),

    /// A document could not be read or decoded. The document is skipped for
    /// the current pass and stays stale.
    #[error("Failed to extract {path}: {message}")]
    Extraction { path: String, message: String },

    /// No extractor is registered for the document's extension
    #[error("No extractor registered for {0}")]
    Unsupported(String),

    /// Failed to load a snapshot from disk
    #[error("Failed to load snapshot from {path}: {message}")]
    SnapshotLoad { path: String, message: String },

    /// Failed to write a snapshot to disk
    #[error("Failed to save snapshot to {path}: {message}")]
    SnapshotSave { path: String, message: String },

    /// Lock poisoned (thread panicked while holding a lock)
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Filesystem subscription failed
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Mutually exclusive flags or other argument validation error
    #[error("{0}")]
    InvalidArgs(String),
}

impl IndexError {
    pub(crate) fn extraction(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        IndexError::Extraction {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}
