//! Layout of the local library folder.
//!
//! ```text
//! <root>/pptx/<rel>.pptx     slide-deck uploads
//! <root>/docx/<rel>.docx     word-document uploads
//! <root>/pdf/<rel>.pdf       PDF uploads and conversion output
//! <root>/png/<kind>/<rel>/   transient per-upload render output
//! <root>/img/<docId>.png     relocated page images served over HTTP
//! ```

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use deckindex_core::models::{FileKind, FileLib};

/// Tracked uploads, relative to a library (or remote) root.
pub const TRACKED_GLOBS: [&str; 3] = ["pptx/**/*.pptx", "docx/**/*.docx", "pdf/**/*.pdf"];

pub const IMAGE_DIR: &str = "img";
pub const RENDER_DIR: &str = "png";

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join(IMAGE_DIR)
    }

    /// Library-relative image path of a page, e.g. `img/<docId>.png`.
    pub fn image_rel_path(doc_id: &str) -> String {
        format!("{}/{}.png", IMAGE_DIR, doc_id)
    }

    /// Root of the transient render directories.
    pub fn render_root(&self) -> PathBuf {
        self.root.join(RENDER_DIR)
    }

    /// Transient render directory of one upload, keyed by its original
    /// path so two uploads never share one: `pptx/a/b.pptx` → `<root>/png/pptx/a/b`.
    pub fn render_dir(&self, ori_rel: &str) -> PathBuf {
        let inner = ori_rel
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(ori_rel);
        self.render_root().join(inner)
    }

    /// Create the tracked and derived folders.
    pub fn ensure_layout(&self) -> Result<()> {
        for kind in FileKind::ALL {
            std::fs::create_dir_all(self.root.join(kind.dir()))?;
        }
        std::fs::create_dir_all(self.root.join(RENDER_DIR))?;
        std::fs::create_dir_all(self.image_dir())?;
        Ok(())
    }

    /// Source upload a PDF was converted from, if that source exists.
    ///
    /// When both `pptx/<rel>.pptx` and `docx/<rel>.docx` exist, the slide
    /// deck owns `pdf/<rel>.pdf`.
    pub fn source_of_pdf(&self, pdf_rel: &str) -> Option<String> {
        sibling_source(pdf_rel, |rel| self.path_of(rel).is_file())
    }

    /// Snapshot of the uploads in this library, derived PDFs left out.
    pub fn snapshot(&self) -> Result<FileLib> {
        Ok(originals_only(&scan_tree(&self.root)?))
    }
}

/// The `pptx/` or `docx/` sibling of `pdf_rel` for which `exists` holds.
pub fn sibling_source(pdf_rel: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
    [FileKind::SlideDeck, FileKind::WordDoc]
        .into_iter()
        .filter_map(|kind| FileKind::Pdf.convert_path(pdf_rel, kind))
        .find(|candidate| exists(candidate))
}

/// Drop PDFs whose sibling source is part of the same snapshot.
pub fn originals_only(lib: &FileLib) -> FileLib {
    let mut out = FileLib::new();
    for kind in FileKind::ALL {
        for (rel, ms) in lib.of_kind(kind) {
            if kind == FileKind::Pdf && sibling_source(rel, |s| lib.contains(s)).is_some() {
                continue;
            }
            out.insert(rel, ms);
        }
    }
    out
}

/// Walk `root` and record every tracked file with its mtime in milliseconds.
/// A missing root is an empty snapshot.
pub fn scan_tree(root: &Path) -> Result<FileLib> {
    let mut lib = FileLib::new();
    if !root.exists() {
        return Ok(lib);
    }

    let tracked = build_globset(&TRACKED_GLOBS)?;

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if !tracked.is_match(&rel_str) {
            continue;
        }

        let modified = entry.metadata()?.modified().unwrap_or(UNIX_EPOCH);
        let ms = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        lib.insert(&rel_str, ms);
    }

    Ok(lib)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()?,
        );
    }
    Ok(builder.build()?)
}
