//! Document conversion collaborators.
//!
//! [`DocumentConverter`] turns a slide deck or word document into a PDF;
//! [`PageRenderer`] turns a PDF into one PNG per page. The default
//! implementations shell out to a headless office suite and to `pdftoppm`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::ToolsConfig;
use crate::tools::{run_command, ToolError};

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `source` into a PDF written inside `out_dir`; returns its path.
    async fn convert_to_pdf(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ToolError>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render every page of `pdf` into `out_dir`.
    ///
    /// Returns `(page_idx, image_path)` pairs with 1-based page indices,
    /// ordered by page.
    async fn render(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<(i64, PathBuf)>, ToolError>;
}

/// `soffice --headless --convert-to pdf`.
pub struct OfficeConverter {
    program: String,
}

impl OfficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for OfficeConverter {
    async fn convert_to_pdf(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(out_dir).await?;

        run_command(
            &self.program,
            [
                OsStr::new("--headless"),
                OsStr::new("--convert-to"),
                OsStr::new("pdf"),
                OsStr::new("--outdir"),
                out_dir.as_os_str(),
                source.as_os_str(),
            ],
        )
        .await?;

        let mut name = source.file_stem().unwrap_or_default().to_os_string();
        name.push(".pdf");
        let pdf = out_dir.join(name);
        if !tokio::fs::try_exists(&pdf).await? {
            return Err(ToolError::MissingOutput {
                program: self.program.clone(),
                path: pdf,
            });
        }
        Ok(pdf)
    }
}

/// `pdftoppm -png -r <density> <pdf> <out_dir>/p`.
pub struct PdftoppmRenderer {
    program: String,
    density: u32,
}

impl PdftoppmRenderer {
    pub fn new(program: impl Into<String>, density: u32) -> Self {
        Self {
            program: program.into(),
            density,
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<(i64, PathBuf)>, ToolError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let density = self.density.to_string();
        let prefix = out_dir.join("p");
        run_command(
            &self.program,
            [
                OsStr::new("-png"),
                OsStr::new("-r"),
                OsStr::new(&density),
                pdf.as_os_str(),
                prefix.as_os_str(),
            ],
        )
        .await?;

        collect_page_images(out_dir).await
    }
}

/// Renderer used when `tools.render_command` is empty: produces no images.
pub struct NoRenderer;

#[async_trait]
impl PageRenderer for NoRenderer {
    async fn render(&self, _pdf: &Path, _out_dir: &Path) -> Result<Vec<(i64, PathBuf)>, ToolError> {
        Ok(Vec::new())
    }
}

pub fn converter_from_config(tools: &ToolsConfig) -> Box<dyn DocumentConverter> {
    Box::new(OfficeConverter::new(tools.office_command.clone()))
}

pub fn renderer_from_config(tools: &ToolsConfig) -> Box<dyn PageRenderer> {
    if tools.render_command.trim().is_empty() {
        Box::new(NoRenderer)
    } else {
        Box::new(PdftoppmRenderer::new(
            tools.render_command.clone(),
            tools.render_density,
        ))
    }
}

/// Page images named `p-<n>.png` (zero padding varies with page count).
async fn collect_page_images(dir: &Path) -> Result<Vec<(i64, PathBuf)>, ToolError> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(idx) = page_index_of(&path) {
            pages.push((idx, path));
        }
    }
    pages.sort_by_key(|(idx, _)| *idx);
    Ok(pages)
}

fn page_index_of(path: &Path) -> Option<i64> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("p-")?.parse().ok()
}
