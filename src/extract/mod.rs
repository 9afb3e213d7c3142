//! Per-format document readers behind a common `Extractor` capability.
//!
//! An extractor turns a file into ordered text blocks (lines, table rows,
//! PDF pages). Snippet windows are computed within a block and never span two.
//! The registry maps file extensions to extractors; adding a format means
//! registering another implementation.

mod pdf;
mod table;
mod text;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::IndexError;
use crate::tokenizer::Tokenizer;

pub use pdf::PdfExtractor;
pub use table::TableExtractor;
pub use text::TextExtractor;

/// Words of one block, in document order.
pub type Segment = Vec<String>;

pub trait Extractor: Send + Sync {
    /// Short format name used in logs.
    fn name(&self) -> &'static str;

    /// Lower-case extensions (without the dot) this extractor handles.
    fn extensions(&self) -> &[&'static str];

    /// Raw text blocks of the document in order.
    fn extract_blocks(&self, path: &Path) -> Result<Vec<String>, IndexError>;

    /// Word segments of the document in order.
    fn extract(&self, path: &Path, tokenizer: &Tokenizer) -> Result<Vec<Segment>, IndexError> {
        Ok(self
            .extract_blocks(path)?
            .iter()
            .map(|block| tokenizer.words(block))
            .filter(|words| !words.is_empty())
            .collect())
    }
}

/// Extension → extractor lookup.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl ExtractorRegistry {
    /// Text (`txt`, `md`), comma/tab-delimited tables and PDF.
    pub fn with_defaults() -> Self {
        let mut registry = ExtractorRegistry::default();
        registry.register(Arc::new(TextExtractor));
        registry.register(Arc::new(TableExtractor::csv()));
        registry.register(Arc::new(TableExtractor::tsv()));
        registry.register(Arc::new(PdfExtractor));
        registry
    }

    /// Register `extractor` for all of its extensions, replacing earlier registrations.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_extension.insert(ext.to_lowercase(), Arc::clone(&extractor));
        }
    }

    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn Extractor>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&ext)
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    pub fn extensions(&self) -> BTreeSet<&str> {
        self.by_extension.keys().map(String::as_str).collect()
    }

    /// Extract `path` with the extractor registered for its extension.
    pub fn extract(&self, path: &Path, tokenizer: &Tokenizer) -> Result<Vec<Segment>, IndexError> {
        let extractor = self
            .for_path(path)
            .ok_or_else(|| IndexError::Unsupported(path.display().to_string()))?;
        extractor.extract(path, tokenizer)
    }
}
