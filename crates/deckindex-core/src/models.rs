//! Core data models used throughout deckindex.
//!
//! A source file (slide deck, word document, or PDF) is indexed as a set of
//! [`Page`]s. Each page owns a [`TermFreqMap`]; the inverted view of those
//! maps is served to the ranker as [`Posting`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Occurrence count of each term within one page.
///
/// Ordered so that iteration (and therefore store writes) is deterministic.
pub type TermFreqMap = BTreeMap<String, i64>;

/// One indexed page of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Shared by every page of the same original file and its derived PDF.
    pub file_id: String,
    /// Derived from `(ori_file_path, page_idx)`.
    pub doc_id: String,
    /// Path of the original upload, relative to the library root.
    pub ori_file_path: String,
    /// 1-based page number.
    pub page_idx: i64,
    /// Path of the rendered page image, relative to the library root.
    /// Empty when no image was rendered for this page.
    pub img_path: String,
}

/// A page that contains a given term, as returned by
/// [`IndexStore::pages_by_term`](crate::store::IndexStore::pages_by_term).
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub page: Page,
    /// Occurrences of the looked-up term in this page.
    pub tf: i64,
    /// Sum of `tf` over every term indexed for this page.
    pub all_term_num: i64,
}

/// A ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPage {
    pub doc_id: String,
    pub ori_file_path: String,
    pub page_idx: i64,
    pub img_path: String,
    pub score: f64,
}

/// Append-only record of a served query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHistoryEntry {
    pub searched_at: DateTime<Utc>,
    pub terms: Vec<String>,
    pub raw_query: String,
}

/// Logical type of a tracked source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Slide deck (`.pptx`), converted to PDF before indexing.
    SlideDeck,
    /// Word document (`.docx`), converted to PDF before indexing.
    WordDoc,
    /// PDF, either an original upload or conversion output.
    Pdf,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::SlideDeck, FileKind::WordDoc, FileKind::Pdf];

    /// Top-level library folder holding files of this kind.
    pub fn dir(self) -> &'static str {
        match self {
            FileKind::SlideDeck => "pptx",
            FileKind::WordDoc => "docx",
            FileKind::Pdf => "pdf",
        }
    }

    /// File extension (without the dot).
    pub fn extension(self) -> &'static str {
        self.dir()
    }

    /// Whether files of this kind must be converted to PDF first.
    pub fn needs_conversion(self) -> bool {
        !matches!(self, FileKind::Pdf)
    }

    /// Classify a library-relative path such as `pptx/q4/deck.pptx`.
    ///
    /// Only files under the kind's own folder with the matching extension
    /// are tracked; everything else returns `None`.
    pub fn classify(rel_path: &str) -> Option<FileKind> {
        let rel_path = rel_path.replace('\\', "/");
        FileKind::ALL.into_iter().find(|kind| {
            rel_path.starts_with(&format!("{}/", kind.dir()))
                && rel_path
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.eq_ignore_ascii_case(kind.extension()))
                    .unwrap_or(false)
        })
    }

    /// Map a library-relative path to the same file under `target`'s folder
    /// and extension, e.g. `pptx/a/b.pptx` → `pdf/a/b.pdf`.
    pub fn convert_path(self, rel_path: &str, target: FileKind) -> Option<String> {
        let inner = rel_path.strip_prefix(&format!("{}/", self.dir()))?;
        let stem = inner
            .strip_suffix(&format!(".{}", self.extension()))
            .or_else(|| inner.rsplit_once('.').map(|(stem, _)| stem))?;
        Some(format!("{}/{}.{}", target.dir(), stem, target.extension()))
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

/// Snapshot of one side of the file tree: `path → last-modified (ms)`,
/// partitioned by [`FileKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLib {
    entries: BTreeMap<FileKind, BTreeMap<String, i64>>,
}

impl FileLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file. Returns `false` (and records nothing) when the path is
    /// not a tracked kind.
    pub fn insert(&mut self, rel_path: &str, last_modified_ms: i64) -> bool {
        match FileKind::classify(rel_path) {
            Some(kind) => {
                self.entries
                    .entry(kind)
                    .or_default()
                    .insert(rel_path.to_string(), last_modified_ms);
                true
            }
            None => false,
        }
    }

    pub fn of_kind(&self, kind: FileKind) -> impl Iterator<Item = (&str, i64)> {
        self.entries
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.iter().map(|(p, t)| (p.as_str(), *t)))
    }

    pub fn get(&self, kind: FileKind, rel_path: &str) -> Option<i64> {
        self.entries.get(&kind).and_then(|m| m.get(rel_path)).copied()
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        FileKind::classify(rel_path)
            .map(|kind| self.get(kind, rel_path).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> FromIterator<(&'a str, i64)> for FileLib {
    fn from_iter<I: IntoIterator<Item = (&'a str, i64)>>(iter: I) -> Self {
        let mut lib = FileLib::new();
        for (path, ts) in iter {
            lib.insert(path, ts);
        }
        lib
    }
}
