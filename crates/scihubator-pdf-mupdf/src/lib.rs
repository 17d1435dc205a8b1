use std::path::Path;

use mupdf::{Document, Page, TextPageFlags};

use scihubator_core::{BackendError, ExtractionBackend};

/// MuPDF-based implementation of [`ExtractionBackend`].
///
/// Keeps the AGPL-licensed mupdf dependency out of the core crate.
///
/// Each page yields its text blocks line by line, every line terminated by
/// `\n`. Running headers and footers are kept unless a margin is configured
/// with [`MupdfBackend::with_header_margin`] or
/// [`MupdfBackend::with_footer_margin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfBackend {
    /// Fraction of page height from the top treated as running header.
    header_margin: Option<f32>,
    /// Fraction of page height from the bottom treated as running footer.
    footer_margin: Option<f32>,
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop blocks lying entirely within the top `ratio` of each page.
    /// `0.0` (or less) disables it.
    pub fn with_header_margin(mut self, ratio: f32) -> Self {
        self.header_margin = margin(ratio);
        self
    }

    /// Drop blocks starting within the bottom `ratio` of each page.
    /// `0.0` (or less) disables it.
    pub fn with_footer_margin(mut self, ratio: f32) -> Self {
        self.footer_margin = margin(ratio);
        self
    }

    fn page_text(&self, page: &Page) -> Result<String, BackendError> {
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        let bounds = page
            .bounds()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        let height = bounds.y1 - bounds.y0;

        let header_limit = self.header_margin.map(|r| bounds.y0 + height * r);
        let footer_limit = self.footer_margin.map(|r| bounds.y1 - height * r);

        let mut text = String::new();
        for block in text_page.blocks() {
            let block_bounds = block.bounds();
            if header_limit.is_some_and(|limit| block_bounds.y1 <= limit) {
                continue;
            }
            if footer_limit.is_some_and(|limit| block_bounds.y0 >= limit) {
                continue;
            }
            for line in block.lines() {
                text.extend(line.chars().map(|c| c.char().unwrap_or('\u{FFFD}')));
                text.push('\n');
            }
        }
        Ok(text)
    }
}

fn margin(ratio: f32) -> Option<f32> {
    (ratio > 0.0).then(|| ratio.min(1.0))
}

impl ExtractionBackend for MupdfBackend {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;
        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
            .map(|page| {
                let page = page.map_err(|e| BackendError::ExtractionError(e.to_string()))?;
                self.page_text(&page)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_are_disabled_by_default() {
        let backend = MupdfBackend::new();
        assert!(backend.header_margin.is_none());
        assert!(backend.footer_margin.is_none());
    }

    #[test]
    fn non_positive_margin_disables_and_large_margin_clamps() {
        let backend = MupdfBackend::new()
            .with_header_margin(0.0)
            .with_footer_margin(3.0);
        assert!(backend.header_margin.is_none());
        assert_eq!(backend.footer_margin, Some(1.0));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = MupdfBackend::new()
            .extract_pages(Path::new("/nonexistent/scihubator/0.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::OpenError(_)));
    }
}
