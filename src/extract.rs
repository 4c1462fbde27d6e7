//! Per-page text extraction from PDF files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::tools::ToolError;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Text of every page of `pdf`; index 0 is page 1.
    async fn extract_pages(&self, pdf: &Path) -> Result<Vec<String>, ToolError>;
}

/// In-process extractor backed by `pdf-extract`.
///
/// Parsing runs on the blocking pool. A panic inside the parser (it does
/// panic on some malformed files) is reported as [`ToolError::Pdf`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_pages(&self, pdf: &Path) -> Result<Vec<String>, ToolError> {
        let bytes = tokio::fs::read(pdf).await?;
        let path: PathBuf = pdf.to_path_buf();

        let parsed = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await;

        match parsed {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ToolError::Pdf {
                path,
                detail: e.to_string(),
            }),
            Err(join) => Err(ToolError::Pdf {
                path,
                detail: format!("parser aborted: {}", join),
            }),
        }
    }
}
