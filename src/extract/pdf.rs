use std::path::Path;

use pdf_oxide::PdfDocument;

use super::Extractor;
use crate::error::IndexError;

/// Portable document, one block per page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn extract_blocks(&self, path: &Path) -> Result<Vec<String>, IndexError> {
        let mut doc = PdfDocument::open(path).map_err(|e| IndexError::extraction(path, e))?;
        let page_count = doc.page_count().map_err(|e| IndexError::extraction(path, e))?;

        let mut pages = Vec::with_capacity(page_count);
        for page in 0..page_count {
            let text = doc
                .extract_text(page)
                .map_err(|e| IndexError::extraction(path, format!("page {}: {}", page + 1, e)))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }
        Ok(pages)
    }
}
