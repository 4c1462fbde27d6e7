//! Storage abstraction for the term index.
//!
//! The [`IndexStore`] trait defines every storage operation the ingestion
//! pipeline and the ranker need, so the SQLite backend and the in-memory
//! backend are interchangeable.
//!
//! # Consistency
//!
//! No cross-row transaction is assumed. Every write targets one key and is
//! idempotent, so concurrent ingestion of two files sharing a term cannot
//! corrupt rows; a query running during ingestion may observe a partially
//! updated index.
//!
//! Referential cleanup is the caller's job: [`IndexStore::delete_pages_by_original_path`]
//! removes pages and their term rows, but derived files (page images) are
//! removed by the pipeline using the returned pages.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Page, Posting, SearchHistoryEntry, TermFreqMap};

/// Abstract storage backend for pages, term frequencies, and term
/// correlations.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_page`](IndexStore::upsert_page) | Create or replace a page, keyed by `doc_id` |
/// | [`upsert_term_frequencies`](IndexStore::upsert_term_frequencies) | Per-term upsert for one page |
/// | [`delete_pages_by_original_path`](IndexStore::delete_pages_by_original_path) | Remove a file's pages and their terms |
/// | [`pages_by_original_path`](IndexStore::pages_by_original_path) | List a file's pages |
/// | [`pages_by_term`](IndexStore::pages_by_term) | Posting list of a term |
/// | [`total_page_count`](IndexStore::total_page_count) | Corpus size |
/// | [`terms_of_page`](IndexStore::terms_of_page) | Terms indexed for a page |
/// | [`update_term_correlation`](IndexStore::update_term_correlation) | Symmetric correlation upsert |
/// | [`closest_terms`](IndexStore::closest_terms) | Highest-correlation neighbours |
/// | [`record_search`](IndexStore::record_search) | Append to search history |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create or replace a page row, keyed by `doc_id`.
    async fn upsert_page(&self, page: &Page) -> Result<()>;

    /// Upsert `(doc_id, term) → tf` for every entry in `terms`.
    ///
    /// Terms already indexed for the page but absent from `terms` are left
    /// untouched; callers needing exact replacement delete the page first.
    async fn upsert_term_frequencies(&self, doc_id: &str, terms: &TermFreqMap) -> Result<()>;

    /// Delete every page whose original path is `ori_file_path`, together
    /// with their term-frequency rows. Returns the deleted pages.
    async fn delete_pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>>;

    /// Every page whose original path is `ori_file_path`, ordered by page index.
    async fn pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>>;

    /// Every page containing `term`, with the term's `tf` and the page's
    /// total term count.
    async fn pages_by_term(&self, term: &str) -> Result<Vec<Posting>>;

    /// Number of indexed pages.
    async fn total_page_count(&self) -> Result<i64>;

    /// Every term indexed for `doc_id`.
    async fn terms_of_page(&self, doc_id: &str) -> Result<Vec<String>>;

    /// Upsert both `(term_a, term_b)` and `(term_b, term_a)` with `score`.
    async fn update_term_correlation(&self, term_a: &str, term_b: &str, score: f64)
        -> Result<()>;

    /// Up to `limit` terms most correlated with `term`, highest score first.
    async fn closest_terms(&self, term: &str, limit: usize) -> Result<Vec<(String, f64)>>;

    /// Append a served query to the search history.
    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()>;
}
