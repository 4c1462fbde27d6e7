//! Deterministic page and file identifiers.
//!
//! Identifiers are hex SHA-256 digests of the original file path, so they
//! are stable across re-ingestion and identical for a source file and the
//! PDF converted from it.

use sha2::{Digest, Sha256};

/// Identifier shared by every page of one original file.
pub fn file_id(ori_file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ori_file_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identifier of one page. Changes when the page moves or the source path
/// changes.
pub fn doc_id(ori_file_path: &str, page_idx: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}", ori_file_path, page_idx).as_bytes());
    format!("{:x}", hasher.finalize())
}
