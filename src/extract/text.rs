use std::path::Path;

use tracing::debug;

use super::Extractor;
use crate::error::IndexError;
use crate::read_file_lossy;

/// Plain text, one block per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt", "text", "md"]
    }

    fn extract_blocks(&self, path: &Path) -> Result<Vec<String>, IndexError> {
        let (content, was_lossy) =
            read_file_lossy(path).map_err(|e| IndexError::extraction(path, e))?;
        if was_lossy {
            debug!(path = %path.display(), "Non-UTF8 text decoded lossily");
        }
        Ok(content.lines().map(str::to_string).collect())
    }
}
