use std::path::Path;

use super::{Extractor, Segment};
use crate::error::IndexError;
use crate::tokenizer::Tokenizer;

/// Delimited table; each row is one block. Cells are tokenized one at a
/// time, so a phrase never matches across a cell boundary.
#[derive(Debug, Clone, Copy)]
pub struct TableExtractor {
    delimiter: u8,
    extensions: &'static [&'static str],
}

impl TableExtractor {
    pub fn csv() -> Self {
        TableExtractor { delimiter: b',', extensions: &["csv"] }
    }

    pub fn tsv() -> Self {
        TableExtractor { delimiter: b'\t', extensions: &["tsv", "tab"] }
    }

    fn records(&self, path: &Path) -> Result<Vec<csv::StringRecord>, IndexError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| IndexError::extraction(path, e))?;

        reader
            .records()
            .map(|record| record.map_err(|e| IndexError::extraction(path, e)))
            .collect()
    }
}

impl Extractor for TableExtractor {
    fn name(&self) -> &'static str {
        "table"
    }

    fn extensions(&self) -> &[&'static str] {
        self.extensions
    }

    fn extract_blocks(&self, path: &Path) -> Result<Vec<String>, IndexError> {
        Ok(self
            .records(path)?
            .iter()
            .map(|record| record.iter().collect::<Vec<_>>().join(" "))
            .collect())
    }

    fn extract(&self, path: &Path, tokenizer: &Tokenizer) -> Result<Vec<Segment>, IndexError> {
        Ok(self
            .records(path)?
            .iter()
            .map(|record| record.iter().flat_map(|cell| tokenizer.words(cell)).collect::<Segment>())
            .filter(|words| !words.is_empty())
            .collect())
    }
}
