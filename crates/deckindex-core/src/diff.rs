//! File-tree differencing.
//!
//! Compares a baseline [`FileLib`] (what is mirrored locally) with a current
//! one (what the remote folder holds) and classifies every path as added,
//! modified, or deleted, partitioned by [`FileKind`].
//!
//! # Rules
//!
//! - In `current` but not in `baseline` → added.
//! - In both, and `current` is strictly newer (millisecond granularity) →
//!   modified. Equal or older timestamps are not modifications.
//! - In `baseline` but not in `current` → deleted.
//!
//! Paths within each list are in lexicographic order.

use std::collections::BTreeMap;

use crate::models::{FileKind, FileLib};

/// A list of paths per [`FileKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathsByKind(BTreeMap<FileKind, Vec<String>>);

impl PathsByKind {
    pub fn get(&self, kind: FileKind) -> &[String] {
        self.0.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, kind: FileKind, path: impl Into<String>) {
        self.0.entry(kind).or_default().push(path.into());
    }

    /// Keep only the paths of `kind` for which `keep` returns true.
    pub fn retain(&mut self, kind: FileKind, mut keep: impl FnMut(&str) -> bool) {
        if let Some(paths) = self.0.get_mut(&kind) {
            paths.retain(|p| keep(p));
        }
    }

    /// All `(kind, path)` pairs, kinds in [`FileKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (FileKind, &str)> {
        self.0
            .iter()
            .flat_map(|(kind, paths)| paths.iter().map(move |p| (*kind, p.as_str())))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.values().any(|paths| paths.iter().any(|p| p == path))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of [`diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub added: PathsByKind,
    pub modified: PathsByKind,
    pub deleted: PathsByKind,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classify `current` against `baseline`.
pub fn diff(baseline: &FileLib, current: &FileLib) -> FileDiff {
    let mut out = FileDiff::default();

    for kind in FileKind::ALL {
        for (path, modified_at) in current.of_kind(kind) {
            match baseline.get(kind, path) {
                None => out.added.push(kind, path),
                Some(before) if modified_at > before => out.modified.push(kind, path),
                Some(_) => {}
            }
        }
        for (path, _) in baseline.of_kind(kind) {
            if current.get(kind, path).is_none() {
                out.deleted.push(kind, path);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(entries: &[(&str, i64)]) -> FileLib {
        entries.iter().copied().collect()
    }

    fn snapshots() -> Vec<FileLib> {
        vec![
            lib(&[]),
            lib(&[("pdf/f.pdf", 10)]),
            lib(&[("pdf/f.pdf", 11), ("pptx/d.pptx", 5)]),
            lib(&[("pptx/d.pptx", 5), ("docx/w.docx", 7), ("pdf/g.pdf", 1)]),
            lib(&[("docx/w.docx", 6), ("pdf/f.pdf", 9), ("pdf/g.pdf", 2)]),
        ]
    }

    #[test]
    fn test_added_from_empty_baseline() {
        let d = diff(&lib(&[]), &lib(&[("pdf/f.pdf", 1_700_000_000_000)]));
        assert_eq!(d.added.get(FileKind::Pdf), ["pdf/f.pdf"]);
        assert!(d.added.get(FileKind::SlideDeck).is_empty());
        assert!(d.added.get(FileKind::WordDoc).is_empty());
        assert!(d.modified.is_empty());
        assert!(d.deleted.is_empty());
    }

    #[test]
    fn test_modified_requires_strictly_newer() {
        let base = lib(&[("pptx/a.pptx", 100), ("pptx/b.pptx", 100), ("pptx/c.pptx", 100)]);
        let cur = lib(&[("pptx/a.pptx", 101), ("pptx/b.pptx", 100), ("pptx/c.pptx", 99)]);
        let d = diff(&base, &cur);
        assert_eq!(d.modified.get(FileKind::SlideDeck), ["pptx/a.pptx"]);
        assert!(d.added.is_empty());
        assert!(d.deleted.is_empty());
    }

    #[test]
    fn test_deleted_partitioned_by_kind() {
        let base = lib(&[("docx/w.docx", 1), ("pdf/p.pdf", 1), ("pptx/s.pptx", 1)]);
        let d = diff(&base, &lib(&[("pdf/p.pdf", 1)]));
        assert_eq!(d.deleted.get(FileKind::WordDoc), ["docx/w.docx"]);
        assert_eq!(d.deleted.get(FileKind::SlideDeck), ["pptx/s.pptx"]);
        assert!(d.deleted.get(FileKind::Pdf).is_empty());
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        for snap in snapshots() {
            assert!(diff(&snap, &snap).is_empty(), "diff(X, X) not empty for {:?}", snap);
        }
    }

    #[test]
    fn test_added_and_deleted_disjoint_and_modified_newer() {
        let snaps = snapshots();
        for base in &snaps {
            for cur in &snaps {
                let d = diff(base, cur);
                for (_, path) in d.added.iter() {
                    assert!(!d.deleted.contains(path), "{} both added and deleted", path);
                }
                for (kind, path) in d.modified.iter() {
                    let before = base.get(kind, path).expect("modified path missing in baseline");
                    let after = cur.get(kind, path).expect("modified path missing in current");
                    assert!(after > before);
                }
            }
        }
    }

    #[test]
    fn test_retain_filters_one_kind() {
        let mut d = diff(&lib(&[("pdf/a.pdf", 1), ("pdf/b.pdf", 1), ("docx/a.docx", 1)]), &lib(&[]));
        d.deleted.retain(FileKind::Pdf, |p| p != "pdf/a.pdf");
        assert_eq!(d.deleted.get(FileKind::Pdf), ["pdf/b.pdf"]);
        assert_eq!(d.deleted.get(FileKind::WordDoc), ["docx/a.docx"]);
    }
}
