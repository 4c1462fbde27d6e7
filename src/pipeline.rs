//! Per-file ingestion pipeline.
//!
//! For every changed upload the [`Pipeline`] runs one sequential chain,
//! while chains of different files interleave freely up to the limits of
//! the three [`TaskScheduler`]s:
//!
//! ```text
//! added/modified pptx|docx ──convert──▶ pdf ──render──▶ png/<rel>/p-N.png
//!                                        │
//!                                        └──extract──▶ page text ──tokenize──▶ TermFreqMap
//!                                                                                │
//!               delete old pages ◀── relocate png → img/<docId>.png ◀────────────┘
//!                     │
//!                     └──▶ upsert pages + term frequencies [+ correlations]
//!
//! deleted ──▶ delete pages by original path ──▶ remove their images
//! ```
//!
//! Deletions run before additions and modifications, and source deletions
//! run before PDF deletions. A failure in any stage of one file is logged
//! and counted; it never aborts the cycle or touches other files.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use deckindex_core::correlation::refresh_term_correlations;
use deckindex_core::diff::FileDiff;
use deckindex_core::ids;
use deckindex_core::models::{FileKind, Page, TermFreqMap};
use deckindex_core::store::IndexStore;

use crate::config::Config;
use crate::convert::{converter_from_config, renderer_from_config, DocumentConverter, PageRenderer};
use crate::extract::{PdfTextExtractor, TextExtractor};
use crate::library::Library;
use crate::scheduler::TaskScheduler;
use crate::tokenize::{tokenizer_from_config, Tokenizer};
use crate::tools::ToolError;

/// Files whose chains are driven at once; the schedulers still bound the
/// external work underneath.
const INGEST_FANOUT: usize = 16;

/// External collaborators used by the pipeline.
#[derive(Clone)]
pub struct Toolchain {
    pub converter: Arc<dyn DocumentConverter>,
    pub renderer: Arc<dyn PageRenderer>,
    pub extractor: Arc<dyn TextExtractor>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl Toolchain {
    pub fn from_config(config: &Config) -> Self {
        Self {
            converter: Arc::from(converter_from_config(&config.tools)),
            renderer: Arc::from(renderer_from_config(&config.tools)),
            extractor: Arc::new(PdfTextExtractor),
            tokenizer: Arc::from(tokenizer_from_config(&config.tools)),
        }
    }
}

/// One scheduler per category of external work.
#[derive(Clone)]
pub struct Schedulers {
    /// Office conversion and page rendering.
    pub convert: TaskScheduler,
    pub extract: TaskScheduler,
    /// Shared with the query path.
    pub tokenize: TaskScheduler,
}

impl Schedulers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            convert: TaskScheduler::from_config("convert", &config.scheduler.convert),
            extract: TaskScheduler::from_config("extract", &config.scheduler.extract),
            tokenize: TaskScheduler::from_config("tokenize", &config.scheduler.tokenize),
        }
    }
}

/// Outcome counts of one [`Pipeline::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub indexed_files: usize,
    pub indexed_pages: usize,
    pub deleted_files: usize,
    pub failed_files: usize,
}

pub struct Pipeline {
    store: Arc<dyn IndexStore>,
    library: Library,
    tools: Toolchain,
    schedulers: Schedulers,
    term_correlation: bool,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn IndexStore>,
        library: Library,
        tools: Toolchain,
        schedulers: Schedulers,
    ) -> Self {
        Self {
            store,
            library,
            tools,
            schedulers,
            term_correlation: false,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn IndexStore>) -> Self {
        Self::new(
            store,
            Library::new(&config.library.root),
            Toolchain::from_config(config),
            Schedulers::from_config(config),
        )
        .with_term_correlation(config.ranking.term_correlation)
    }

    /// Refresh term correlations for every term of every upserted page.
    pub fn with_term_correlation(mut self, enabled: bool) -> Self {
        self.term_correlation = enabled;
        self
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    pub fn schedulers(&self) -> &Schedulers {
        &self.schedulers
    }

    /// Apply `changes` to the index.
    pub async fn run(&self, changes: &FileDiff) -> CycleReport {
        let mut report = CycleReport::default();
        self.sweep_render_dirs().await;

        for kind in [FileKind::SlideDeck, FileKind::WordDoc, FileKind::Pdf] {
            for rel in changes.deleted.get(kind) {
                match self.delete_file(kind, rel).await {
                    Ok(true) => report.deleted_files += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(path = %rel, error = %e, "deletion failed");
                        report.failed_files += 1;
                    }
                }
            }
        }

        let outcomes: Vec<(&str, Result<Option<usize>>)> =
            stream::iter(changes.added.iter().chain(changes.modified.iter()))
                .map(|(kind, rel)| async move { (rel, self.ingest_file(kind, rel).await) })
                .buffer_unordered(INGEST_FANOUT)
                .boxed()
                .collect()
                .await;

        for (rel, outcome) in outcomes {
            match outcome {
                Ok(Some(pages)) => {
                    report.indexed_files += 1;
                    report.indexed_pages += pages;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %rel, error = format!("{:#}", e), "ingestion failed");
                    report.failed_files += 1;
                }
            }
        }

        report
    }

    /// Remove a vanished upload from the index. Returns whether it counted
    /// as an upload removal.
    async fn delete_file(&self, kind: FileKind, rel: &str) -> Result<bool> {
        let removed = self.store.delete_pages_by_original_path(rel).await?;
        self.remove_images(&removed).await;

        if kind == FileKind::Pdf {
            if let Some(source) = self.library.source_of_pdf(rel) {
                // Conversion output of a live source; the source's pages are
                // keyed by the source path and stay.
                debug!(path = %rel, source = %source, "derived PDF vanished");
                return Ok(!removed.is_empty());
            }
        } else if let Some(pdf) = kind.convert_path(rel, FileKind::Pdf) {
            match self.library.source_of_pdf(&pdf) {
                Some(owner) => debug!(path = %rel, owner = %owner, "derived PDF kept for its owner"),
                None => remove_file_if_exists(self.library.path_of(&pdf)).await,
            }
        }

        info!(path = %rel, pages = removed.len(), "removed from index");
        Ok(true)
    }

    /// Index one upload. `Ok(None)` when the file is not an upload of its
    /// own (a PDF converted from a live source).
    async fn ingest_file(&self, kind: FileKind, rel: &str) -> Result<Option<usize>> {
        let (ori, pdf_rel) = if kind.needs_conversion() {
            (rel.to_string(), self.convert(kind, rel).await?)
        } else {
            if let Some(source) = self.library.source_of_pdf(rel) {
                debug!(path = %rel, source = %source, "skipping derived PDF");
                return Ok(None);
            }
            (rel.to_string(), rel.to_string())
        };

        let render_dir = self.library.render_dir(&ori);
        let result = self.index_pdf(&ori, &pdf_rel, &render_dir).await;
        remove_dir_if_exists(render_dir).await;

        let pages = result?;
        info!(path = %ori, pages, "indexed");
        Ok(Some(pages))
    }

    async fn index_pdf(&self, ori: &str, pdf_rel: &str, render_dir: &Path) -> Result<usize> {
        let pdf_path = self.library.path_of(pdf_rel);
        remove_dir_if_exists(render_dir.to_path_buf()).await;

        let images = {
            let renderer = Arc::clone(&self.tools.renderer);
            let (pdf, out) = (pdf_path.clone(), render_dir.to_path_buf());
            scheduled(&self.schedulers.convert, async move {
                renderer.render(&pdf, &out).await
            })
            .await
            .context("render failed")?
        };

        let texts = {
            let extractor = Arc::clone(&self.tools.extractor);
            let pdf = pdf_path.clone();
            scheduled(&self.schedulers.extract, async move {
                extractor.extract_pages(&pdf).await
            })
            .await
            .context("text extraction failed")?
        };

        let file_id = ids::file_id(ori);
        let tokenized: Vec<(i64, Option<TermFreqMap>)> = stream::iter(texts.into_iter().enumerate())
            .map(|(i, text)| async move { (i as i64 + 1, self.tokenize_page(ori, text).await) })
            .buffered(self.schedulers.tokenize.capacity())
            .collect()
            .await;

        let previous = self.store.delete_pages_by_original_path(ori).await?;

        let mut pages: Vec<(Page, TermFreqMap)> = Vec::new();
        for (page_idx, terms) in tokenized {
            let Some(terms) = terms else { continue };
            let doc_id = ids::doc_id(ori, page_idx);
            let img_path = match images.iter().find(|(idx, _)| *idx == page_idx) {
                Some((_, png)) => self.relocate_image(png, &doc_id).await,
                None => String::new(),
            };
            pages.push((
                Page {
                    file_id: file_id.clone(),
                    doc_id,
                    ori_file_path: ori.to_string(),
                    page_idx,
                    img_path,
                },
                terms,
            ));
        }

        let kept: BTreeSet<&str> = pages.iter().map(|(p, _)| p.doc_id.as_str()).collect();
        let stale: Vec<Page> = previous
            .into_iter()
            .filter(|p| !kept.contains(p.doc_id.as_str()))
            .collect();
        self.remove_images(&stale).await;

        for (page, terms) in &pages {
            self.store.upsert_page(page).await?;
            self.store
                .upsert_term_frequencies(&page.doc_id, terms)
                .await?;
        }

        if self.term_correlation {
            let terms: BTreeSet<&String> = pages.iter().flat_map(|(_, t)| t.keys()).collect();
            for term in terms {
                if let Err(e) = refresh_term_correlations(self.store.as_ref(), term).await {
                    warn!(term = %term, error = %e, "correlation refresh failed");
                }
            }
        }

        Ok(pages.len())
    }

    /// Convert a slide deck or word document; returns the library-relative
    /// path of the PDF.
    ///
    /// `pdf/<rel>.pdf` has a single owner. A word document sharing its stem
    /// with a slide deck is refused rather than overwriting the deck's PDF.
    async fn convert(&self, kind: FileKind, rel: &str) -> Result<String> {
        let pdf_rel = kind
            .convert_path(rel, FileKind::Pdf)
            .with_context(|| format!("cannot derive PDF path for {}", rel))?;
        if let Some(owner) = self.library.source_of_pdf(&pdf_rel).filter(|o| o != rel) {
            anyhow::bail!("{} would overwrite {}, which belongs to {}", rel, pdf_rel, owner);
        }
        let target = self.library.path_of(&pdf_rel);
        let out_dir = target
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.library.root().to_path_buf());

        let converter = Arc::clone(&self.tools.converter);
        let source = self.library.path_of(rel);
        let produced = scheduled(&self.schedulers.convert, async move {
            converter.convert_to_pdf(&source, &out_dir).await
        })
        .await
        .context("conversion failed")?;

        if produced != target {
            tokio::fs::rename(&produced, &target).await?;
        }
        Ok(pdf_rel)
    }

    /// Tokenize one page; `None` (page skipped) on failure or timeout.
    async fn tokenize_page(&self, ori: &str, text: String) -> Option<TermFreqMap> {
        let tokenizer = Arc::clone(&self.tools.tokenizer);
        let outcome = self
            .schedulers
            .tokenize
            .submit(
                move |done| async move {
                    done.resolve(tokenizer.tokenize(&text).await.ok());
                },
                || None,
            )
            .await;
        if outcome.is_none() {
            warn!(path = %ori, "skipping page that failed to tokenize");
        }
        outcome
    }

    /// Move a rendered page image to `img/<docId>.png`. Returns the
    /// library-relative path, or an empty string if the move failed.
    async fn relocate_image(&self, png: &Path, doc_id: &str) -> String {
        let rel = Library::image_rel_path(doc_id);
        let dest = self.library.path_of(&rel);
        let moved = async {
            tokio::fs::create_dir_all(self.library.image_dir()).await?;
            tokio::fs::rename(png, &dest).await
        }
        .await;
        match moved {
            Ok(()) => rel,
            Err(e) => {
                warn!(image = %png.display(), error = %e, "failed to relocate page image");
                String::new()
            }
        }
    }

    /// Drop render output left behind by jobs abandoned after a timeout.
    async fn sweep_render_dirs(&self) {
        let root = self.library.render_root();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "cannot list render directory");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                debug!(path = %path.display(), "removing stale render output");
                remove_dir_if_exists(path).await;
            } else {
                remove_file_if_exists(path).await;
            }
        }
    }

    async fn remove_images(&self, pages: &[Page]) {
        for page in pages.iter().filter(|p| !p.img_path.is_empty()) {
            remove_file_if_exists(self.library.path_of(&page.img_path)).await;
        }
    }
}

/// Run a collaborator call in a scheduler slot, flattening both failure
/// layers into one error.
async fn scheduled<T, Fut>(scheduler: &TaskScheduler, fut: Fut) -> Result<T>
where
    T: Send + 'static,
    Fut: Future<Output = std::result::Result<T, ToolError>> + Send + 'static,
{
    Ok(scheduler.run(fut).await??)
}

async fn remove_file_if_exists(path: PathBuf) {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

async fn remove_dir_if_exists(path: PathBuf) {
    match tokio::fs::remove_dir_all(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::SimpleTokenizer;
    use async_trait::async_trait;
    use deckindex_core::models::FileLib;
    use deckindex_core::rank::{Ranker, ScoringStrategy};
    use deckindex_core::store::memory::InMemoryStore;
    use deckindex_core::diff::diff;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // Test "PDFs" are UTF-8 files whose pages are separated by form feeds.
    const PAGE_BREAK: char = '\x0c';

    /// Copies the source to `<out>/<stem>.pdf`; hangs while `stalled`.
    #[derive(Default)]
    struct FakeConverter {
        stalled: AtomicBool,
    }

    #[async_trait]
    impl DocumentConverter for FakeConverter {
        async fn convert_to_pdf(
            &self,
            source: &Path,
            out_dir: &Path,
        ) -> std::result::Result<PathBuf, ToolError> {
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            tokio::fs::create_dir_all(out_dir).await?;
            let mut name = source.file_stem().unwrap_or_default().to_os_string();
            name.push(".pdf");
            let pdf = out_dir.join(name);
            tokio::fs::copy(source, &pdf).await?;
            Ok(pdf)
        }
    }

    struct FakeRenderer;

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(
            &self,
            pdf: &Path,
            out_dir: &Path,
        ) -> std::result::Result<Vec<(i64, PathBuf)>, ToolError> {
            let text = tokio::fs::read_to_string(pdf).await?;
            tokio::fs::create_dir_all(out_dir).await?;
            let mut images = Vec::new();
            for idx in 1..=text.split(PAGE_BREAK).count() as i64 {
                let png = out_dir.join(format!("p-{}.png", idx));
                tokio::fs::write(&png, format!("image {}", idx)).await?;
                images.push((idx, png));
            }
            Ok(images)
        }
    }

    struct FakeExtractor;

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract_pages(&self, pdf: &Path) -> std::result::Result<Vec<String>, ToolError> {
            let text = tokio::fs::read_to_string(pdf).await?;
            Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
        }
    }

    /// Built-in tokenizer that fails on pages mentioning "poison".
    struct PickyTokenizer;

    #[async_trait]
    impl Tokenizer for PickyTokenizer {
        async fn tokenize(&self, text: &str) -> std::result::Result<TermFreqMap, ToolError> {
            if text.contains("poison") {
                return Err(ToolError::MalformedOutput {
                    program: "picky".to_string(),
                    detail: "refused".to_string(),
                });
            }
            SimpleTokenizer.tokenize(text).await
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<InMemoryStore>,
        converter: Arc<FakeConverter>,
        pipeline: Pipeline,
        baseline: FileLib,
    }

    impl Harness {
        fn new(convert_timeout: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(InMemoryStore::default());
            let converter = Arc::new(FakeConverter::default());
            let library = Library::new(dir.path());
            library.ensure_layout().unwrap();

            let tools = Toolchain {
                converter: converter.clone(),
                renderer: Arc::new(FakeRenderer),
                extractor: Arc::new(FakeExtractor),
                tokenizer: Arc::new(PickyTokenizer),
            };
            let schedulers = Schedulers {
                convert: TaskScheduler::new("convert", 2, convert_timeout),
                extract: TaskScheduler::new("extract", 2, Duration::from_secs(10)),
                tokenize: TaskScheduler::new("tokenize", 2, Duration::from_secs(10)),
            };
            let pipeline = Pipeline::new(store.clone(), library, tools, schedulers);

            Self {
                dir,
                store,
                converter,
                pipeline,
                baseline: FileLib::new(),
            }
        }

        fn write(&self, rel: &str, pages: &[&str]) {
            let path = self.dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, pages.join("\x0c")).unwrap();
        }

        fn remove(&self, rel: &str) {
            std::fs::remove_file(self.dir.path().join(rel)).unwrap();
        }

        /// Run the pipeline over `current` and adopt it as the new baseline.
        async fn cycle(&mut self, current: &[(&str, i64)]) -> CycleReport {
            let current: FileLib = current.iter().copied().collect();
            let changes = diff(&self.baseline, &current);
            let report = self.pipeline.run(&changes).await;
            self.baseline = current;
            report
        }

        async fn rank(&self, term: &str) -> Vec<(String, i64)> {
            Ranker::new(self.store.as_ref(), ScoringStrategy::Raw)
                .rank(&[term.to_string()])
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.ori_file_path, r.page_idx))
                .collect()
        }

        fn exists(&self, rel: &str) -> bool {
            self.dir.path().join(rel).exists()
        }
    }

    #[tokio::test]
    async fn test_pdf_upload_is_indexed_with_flat_images() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pdf/q4/report.pdf", &["revenue growth", "hiring plan"]);

        let report = h.cycle(&[("pdf/q4/report.pdf", 1)]).await;
        assert_eq!(
            report,
            CycleReport {
                indexed_files: 1,
                indexed_pages: 2,
                deleted_files: 0,
                failed_files: 0
            }
        );

        let pages = h
            .store
            .pages_by_original_path("pdf/q4/report.pdf")
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        let first = &pages[0];
        assert_eq!(first.doc_id, ids::doc_id("pdf/q4/report.pdf", 1));
        assert_eq!(first.file_id, ids::file_id("pdf/q4/report.pdf"));
        assert_eq!(first.img_path, format!("img/{}.png", first.doc_id));
        assert!(h.exists(&first.img_path));
        assert!(!h.exists("png/pdf/q4/report"));

        assert_eq!(h.rank("hiring").await, vec![("pdf/q4/report.pdf".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_slide_deck_is_converted_and_attributed_to_source() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pptx/deck.pptx", &["roadmap"]);

        let report = h.cycle(&[("pptx/deck.pptx", 1)]).await;
        assert_eq!(report.indexed_files, 1);
        assert!(h.exists("pdf/deck.pdf"));
        assert_eq!(h.rank("roadmap").await, vec![("pptx/deck.pptx".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_modification_replaces_pages_exactly() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pdf/a.pdf", &["alpha", "beta", "gamma"]);
        h.cycle(&[("pdf/a.pdf", 1)]).await;
        let third = h.store.pages_by_original_path("pdf/a.pdf").await.unwrap()[2].clone();
        assert!(h.exists(&third.img_path));

        h.write("pdf/a.pdf", &["alpha", "delta"]);
        let report = h.cycle(&[("pdf/a.pdf", 2)]).await;
        assert_eq!(report.indexed_pages, 2);

        assert!(h.rank("gamma").await.is_empty());
        assert!(h.rank("beta").await.is_empty());
        assert_eq!(h.rank("delta").await, vec![("pdf/a.pdf".to_string(), 2)]);
        assert!(!h.exists(&third.img_path));
        assert_eq!(h.store.total_page_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_deletion_cascades_to_terms_and_images() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("docx/memo.docx", &["budget"]);
        h.write("pdf/keep.pdf", &["budget"]);
        h.cycle(&[("docx/memo.docx", 1), ("pdf/keep.pdf", 1)]).await;
        let memo_img = h.store.pages_by_original_path("docx/memo.docx").await.unwrap()[0]
            .img_path
            .clone();

        h.remove("docx/memo.docx");
        let report = h.cycle(&[("pdf/keep.pdf", 1)]).await;
        assert_eq!(report.deleted_files, 1);

        assert_eq!(h.rank("budget").await, vec![("pdf/keep.pdf".to_string(), 1)]);
        assert!(!h.exists(&memo_img));
        assert!(!h.exists("pdf/memo.pdf"));
    }

    #[tokio::test]
    async fn test_same_stem_sources_do_not_share_a_pdf() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pptx/plan.pptx", &["alpha"]);
        h.write("docx/plan.docx", &["beta"]);

        let report = h
            .cycle(&[("pptx/plan.pptx", 1), ("docx/plan.docx", 1)])
            .await;
        assert_eq!(report.indexed_files, 1);
        assert_eq!(report.failed_files, 1);
        assert_eq!(h.rank("alpha").await, vec![("pptx/plan.pptx".to_string(), 1)]);
        assert!(h.rank("beta").await.is_empty());

        // Removing the refused document leaves the deck's PDF alone.
        h.remove("docx/plan.docx");
        h.cycle(&[("pptx/plan.pptx", 1)]).await;
        assert!(h.exists("pdf/plan.pdf"));
        assert_eq!(h.rank("alpha").await, vec![("pptx/plan.pptx".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_stale_render_output_is_swept() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("png/pdf/abandoned/p-1.png", &["leftover"]);

        h.cycle(&[]).await;
        assert!(!h.exists("png/pdf/abandoned"));
        assert!(h.exists("png"));
    }

    #[tokio::test]
    async fn test_vanished_derived_pdf_keeps_source_pages() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pptx/deck.pptx", &["launch"]);
        h.cycle(&[("pptx/deck.pptx", 1)]).await;

        // A diff claiming the derived PDF was deleted while its source lives.
        let changes = diff(
            &[("pdf/deck.pdf", 1i64)].into_iter().collect(),
            &FileLib::new(),
        );
        let report = h.pipeline.run(&changes).await;
        assert_eq!(report.deleted_files, 0);
        assert_eq!(h.rank("launch").await, vec![("pptx/deck.pptx".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_conversion_timeout_then_recovery() {
        let mut h = Harness::new(Duration::from_millis(200));
        h.write("pptx/slow.pptx", &["quarterly"]);
        h.write("pdf/fast.pdf", &["quarterly"]);
        h.converter.stalled.store(true, Ordering::SeqCst);

        let report = h.cycle(&[("pptx/slow.pptx", 1), ("pdf/fast.pdf", 1)]).await;
        assert_eq!(report.failed_files, 1);
        assert_eq!(report.indexed_files, 1);
        assert_eq!(h.rank("quarterly").await, vec![("pdf/fast.pdf".to_string(), 1)]);

        // Retried only once the file changes again.
        h.converter.stalled.store(false, Ordering::SeqCst);
        let idle = h.cycle(&[("pptx/slow.pptx", 1), ("pdf/fast.pdf", 1)]).await;
        assert_eq!(idle, CycleReport::default());

        let report = h.cycle(&[("pptx/slow.pptx", 2), ("pdf/fast.pdf", 1)]).await;
        assert_eq!(report.indexed_files, 1);
        assert_eq!(report.failed_files, 0);
        let hits = h.rank("quarterly").await;
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&("pptx/slow.pptx".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_untokenizable_page_is_skipped() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pdf/mixed.pdf", &["intro", "poison pill", "summary"]);

        let report = h.cycle(&[("pdf/mixed.pdf", 1)]).await;
        assert_eq!(report.indexed_files, 1);
        assert_eq!(report.indexed_pages, 2);
        let idx: Vec<i64> = h
            .store
            .pages_by_original_path("pdf/mixed.pdf")
            .await
            .unwrap()
            .iter()
            .map(|p| p.page_idx)
            .collect();
        assert_eq!(idx, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_term_correlation_is_opt_in() {
        let mut h = Harness::new(Duration::from_secs(10));
        h.write("pdf/a.pdf", &["solar panel"]);
        h.cycle(&[("pdf/a.pdf", 1)]).await;
        assert!(h.store.closest_terms("solar", 5).await.unwrap().is_empty());

        h.pipeline = Pipeline::new(
            h.store.clone(),
            Library::new(h.dir.path()),
            h.pipeline.tools().clone(),
            h.pipeline.schedulers().clone(),
        )
        .with_term_correlation(true);
        let report = h.cycle(&[("pdf/a.pdf", 2)]).await;
        assert_eq!(report.indexed_files, 1);

        let closest = h.store.closest_terms("solar", 5).await.unwrap();
        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0].0, "panel");
        assert!((closest[0].1 - 1.0).abs() < 1e-9);
    }
}
