//! Sync cycles: mirror the remote folder, then index what changed.
//!
//! A cycle has two steps:
//!
//! 1. **Pull** (only when `sync.remote_root` is set): the local library is
//!    diffed against the remote snapshot; added and modified uploads are
//!    copied in, deleted ones (and the PDFs converted from them) are removed.
//! 2. **Index**: the local library is diffed against the manifest of files
//!    the index has already processed, and the [`Pipeline`] runs over that
//!    diff. Processed files are then recorded in (or dropped from) the
//!    manifest; failed files are recorded too, so they are retried only
//!    when they change again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{error, info, warn};

use deckindex_core::diff::{diff, FileDiff};
use deckindex_core::models::{FileKind, FileLib};

use crate::config::Config;
use crate::library::{originals_only, scan_tree, Library};
use crate::pipeline::{CycleReport, Pipeline};
use crate::search::MemoSlot;
use crate::sqlite_store::SqliteStore;

/// Remote side of the mirror.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Every tracked upload on the remote, with millisecond mtimes.
    async fn snapshot(&self) -> Result<FileLib>;

    /// Copy `rel_path` to `dest`, creating parent folders.
    async fn fetch(&self, rel_path: &str, dest: &Path) -> Result<()>;
}

/// A synchronized folder (network share, cloud-drive client folder) laid
/// out like the library: `pptx/`, `docx/`, `pdf/`.
pub struct MirrorSource {
    root: PathBuf,
}

impl MirrorSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileSource for MirrorSource {
    async fn snapshot(&self) -> Result<FileLib> {
        let root = self.root.clone();
        if !root.exists() {
            anyhow::bail!("Remote root does not exist: {}", root.display());
        }
        let lib = tokio::task::spawn_blocking(move || scan_tree(&root)).await??;
        Ok(originals_only(&lib))
    }

    async fn fetch(&self, rel_path: &str, dest: &Path) -> Result<()> {
        let src = self.root.join(rel_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dest)
            .await
            .with_context(|| format!("Failed to copy {}", src.display()))?;

        let modified = tokio::fs::metadata(&src).await?.modified()?;
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::File::options()
                .write(true)
                .open(&dest)?
                .set_modified(modified)
        })
        .await??;
        Ok(())
    }
}

/// Bring the local library in line with `source`. Returns the files
/// actually changed locally.
pub async fn pull(library: &Library, source: &dyn FileSource) -> Result<FileDiff> {
    let local = library.snapshot()?;
    let remote = source.snapshot().await?;
    let mut changes = diff(&local, &remote);

    for kind in FileKind::ALL {
        let mut failed: Vec<String> = Vec::new();
        for rel in changes.added.get(kind).iter().chain(changes.modified.get(kind)) {
            if let Err(e) = source.fetch(rel, &library.path_of(rel)).await {
                warn!(path = %rel, error = %e, "download failed");
                failed.push(rel.clone());
            }
        }
        changes.added.retain(kind, |rel| !failed.iter().any(|f| f == rel));
        changes.modified.retain(kind, |rel| !failed.iter().any(|f| f == rel));
    }

    for (kind, rel) in changes.deleted.iter() {
        remove_if_exists(&library.path_of(rel)).await;
        let derived = kind
            .convert_path(rel, FileKind::Pdf)
            .filter(|_| kind.needs_conversion());
        if let Some(pdf) = derived {
            // A same-stem sibling still owns the PDF.
            if library.source_of_pdf(&pdf).is_none() {
                remove_if_exists(&library.path_of(&pdf)).await;
            }
        }
    }

    info!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "pulled remote changes"
    );
    Ok(changes)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove local copy"),
    }
}

/// Everything one cycle needs.
pub struct SyncContext {
    pub library: Library,
    pub store: Arc<SqliteStore>,
    pub pipeline: Pipeline,
    pub source: Option<Box<dyn FileSource>>,
    pub memo: Option<Arc<MemoSlot>>,
}

impl SyncContext {
    pub fn from_config(config: &Config, store: Arc<SqliteStore>) -> Self {
        let library = Library::new(&config.library.root);
        let pipeline = Pipeline::from_config(config, store.clone());
        let source = config
            .sync
            .remote_root
            .as_ref()
            .map(|root| Box::new(MirrorSource::new(root)) as Box<dyn FileSource>);
        Self {
            library,
            store,
            pipeline,
            source,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: Arc<MemoSlot>) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Run one pull + index cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.library.ensure_layout()?;

        if let Some(source) = &self.source {
            if let Err(e) = pull(&self.library, source.as_ref()).await {
                // Index whatever is local; the next cycle retries the pull.
                warn!(error = %e, "remote pull failed");
            }
        }

        let baseline = self.store.indexed_files().await?;
        let current = self.library.snapshot()?;
        let changes = diff(&baseline, &current);
        if changes.is_empty() {
            info!("library unchanged");
            return Ok(CycleReport::default());
        }

        let report = self.pipeline.run(&changes).await;

        for (kind, rel) in changes.added.iter().chain(changes.modified.iter()) {
            if let Some(ms) = current.get(kind, rel) {
                self.store.record_indexed_file(kind, rel, ms).await?;
            }
        }
        for (_, rel) in changes.deleted.iter() {
            self.store.forget_indexed_file(rel).await?;
        }

        if let Some(memo) = &self.memo {
            memo.reset();
        }

        info!(
            indexed_files = report.indexed_files,
            indexed_pages = report.indexed_pages,
            deleted_files = report.deleted_files,
            failed_files = report.failed_files,
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Run cycles forever, `interval` apart. Cycle errors are logged.
    pub async fn run_loop(&self, interval: Duration) {
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "sync cycle failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::migrate(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// `dix sync`: run one cycle and print its report.
pub async fn run_sync(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let ctx = SyncContext::from_config(config, store.clone());
    let report = ctx.run_cycle().await?;

    println!("sync complete");
    println!("  indexed files: {}", report.indexed_files);
    println!("  indexed pages: {}", report.indexed_pages);
    println!("  deleted files: {}", report.deleted_files);
    println!("  failed files:  {}", report.failed_files);

    store.pool().close().await;
    Ok(())
}

/// `dix watch`: run cycles until the process is stopped.
pub async fn run_watch(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let ctx = SyncContext::from_config(config, store);
    println!(
        "Watching {} every {}s",
        config.library.root.display(),
        config.sync.poll_interval_secs
    );
    ctx.run_loop(config.sync.poll_interval()).await;
    Ok(())
}

/// Millisecond mtime of a local file, `0` when unknown.
pub fn mtime_ms(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
