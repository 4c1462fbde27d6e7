//! Query-time ranking over an [`IndexStore`].
//!
//! # Strategies
//!
//! Exactly one [`ScoringStrategy`] is active per deployment:
//!
//! - **Raw**: a page scores the largest `tf` it reaches for any single
//!   query term. Matching several terms does not boost a page.
//! - **TF-IDF**: each posting contributes
//!   `log10(N / (1 + df)) × tf / allTermNum`; contributions sum per page.
//! - **BM25** (`k1 = 1.5`, `b = 0.75`): each posting contributes
//!   `log10((N − df + 0.5) / (df + 0.5)) × tf(k1 + 1) / (tf + k1(1 − b + b·allTermNum / avgdl))`,
//!   where `avgdl` is the mean `allTermNum` over that term's posting list;
//!   contributions sum per page.
//!
//! `N` is the total page count and `df` the posting-list length.
//!
//! # Merging
//!
//! Contributions of every query term are flattened in query-term order,
//! grouped by `doc_id` (first-seen order kept), combined with the
//! strategy's rule (max or sum), then stably sorted by descending score.
//! Equal scores therefore keep their first-seen order.
//!
//! # Memo
//!
//! Posting lists can be cached in a [`SearchMemo`] supplied by the caller.
//! The memo is an explicit object with the lifetime the caller chooses (one
//! request, or one sync cycle), never process-wide state.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::models::{Posting, RankedPage};
use crate::store::IndexStore;

/// BM25 term-frequency saturation.
pub const BM25_K1: f64 = 1.5;
/// BM25 document-length normalization.
pub const BM25_B: f64 = 0.75;

/// Scoring formula applied by the [`Ranker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoringStrategy {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "tfidf")]
    TfIdf,
    #[default]
    #[serde(rename = "bm25")]
    Bm25,
}

impl ScoringStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoringStrategy::Raw => "raw",
            ScoringStrategy::TfIdf => "tfidf",
            ScoringStrategy::Bm25 => "bm25",
        }
    }

    /// Whether per-term scores are summed (`true`) or maxed (`false`).
    fn sums(self) -> bool {
        !matches!(self, ScoringStrategy::Raw)
    }
}

impl FromStr for ScoringStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(ScoringStrategy::Raw),
            "tfidf" => Ok(ScoringStrategy::TfIdf),
            "bm25" => Ok(ScoringStrategy::Bm25),
            other => bail!(
                "Unknown ranking strategy: '{}'. Use raw, tfidf, or bm25.",
                other
            ),
        }
    }
}

impl std::fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache of posting lists and corpus size for one request or one cycle.
#[derive(Default)]
pub struct SearchMemo {
    postings: Mutex<HashMap<String, Arc<Vec<Posting>>>>,
    total: Mutex<Option<i64>>,
}

impl SearchMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached posting lists.
    pub fn len(&self) -> usize {
        self.postings.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached_postings(&self, term: &str) -> Option<Arc<Vec<Posting>>> {
        self.postings.lock().ok()?.get(term).cloned()
    }

    fn store_postings(&self, term: &str, postings: Arc<Vec<Posting>>) {
        if let Ok(mut map) = self.postings.lock() {
            map.insert(term.to_string(), postings);
        }
    }

    fn cached_total(&self) -> Option<i64> {
        self.total.lock().ok().and_then(|t| *t)
    }

    fn store_total(&self, total: i64) {
        if let Ok(mut t) = self.total.lock() {
            *t = Some(total);
        }
    }
}

/// Relevance ranking over an [`IndexStore`].
pub struct Ranker<'a, S: IndexStore + ?Sized> {
    store: &'a S,
    strategy: ScoringStrategy,
    memo: Option<&'a SearchMemo>,
    expand_correlated: usize,
}

impl<'a, S: IndexStore + ?Sized> Ranker<'a, S> {
    pub fn new(store: &'a S, strategy: ScoringStrategy) -> Self {
        Self {
            store,
            strategy,
            memo: None,
            expand_correlated: 0,
        }
    }

    /// Read posting lists and corpus size through `memo`.
    pub fn with_memo(mut self, memo: &'a SearchMemo) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Also score up to `neighbours` most-correlated terms per query term,
    /// weighted by their correlation score. `0` disables expansion.
    pub fn with_correlation_expansion(mut self, neighbours: usize) -> Self {
        self.expand_correlated = neighbours;
        self
    }

    pub fn strategy(&self) -> ScoringStrategy {
        self.strategy
    }

    /// Rank pages for `terms`, best first.
    pub async fn rank(&self, terms: &[String]) -> Result<Vec<RankedPage>> {
        let weighted = self.weighted_terms(terms).await?;
        if weighted.is_empty() {
            return Ok(Vec::new());
        }

        let total = self.total_page_count().await?;

        let mut merged: Vec<RankedPage> = Vec::new();
        let mut slot_of: HashMap<String, usize> = HashMap::new();

        for (term, weight) in &weighted {
            let postings = self.postings(term).await?;
            for (posting, score) in score_postings(self.strategy, &postings, total) {
                let score = score * weight;
                match slot_of.get(&posting.page.doc_id) {
                    Some(&i) => {
                        let entry = &mut merged[i];
                        if self.strategy.sums() {
                            entry.score += score;
                        } else if score > entry.score {
                            entry.score = score;
                        }
                    }
                    None => {
                        slot_of.insert(posting.page.doc_id.clone(), merged.len());
                        merged.push(RankedPage {
                            doc_id: posting.page.doc_id.clone(),
                            ori_file_path: posting.page.ori_file_path.clone(),
                            page_idx: posting.page.page_idx,
                            img_path: posting.page.img_path.clone(),
                            score,
                        });
                    }
                }
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(merged)
    }

    /// Deduplicated query terms with weight 1.0, followed by correlated
    /// neighbours (when enabled) weighted by their correlation score.
    async fn weighted_terms(&self, terms: &[String]) -> Result<Vec<(String, f64)>> {
        let mut out: Vec<(String, f64)> = Vec::new();
        for term in terms {
            if !term.is_empty() && !out.iter().any(|(t, _)| t == term) {
                out.push((term.clone(), 1.0));
            }
        }

        if self.expand_correlated > 0 {
            let originals: Vec<String> = out.iter().map(|(t, _)| t.clone()).collect();
            for term in &originals {
                for (neighbour, score) in self
                    .store
                    .closest_terms(term, self.expand_correlated)
                    .await?
                {
                    if score > 0.0 && !out.iter().any(|(t, _)| *t == neighbour) {
                        out.push((neighbour, score));
                    }
                }
            }
        }

        Ok(out)
    }

    async fn postings(&self, term: &str) -> Result<Arc<Vec<Posting>>> {
        if let Some(hit) = self.memo.and_then(|m| m.cached_postings(term)) {
            return Ok(hit);
        }
        let fetched = Arc::new(self.store.pages_by_term(term).await?);
        if let Some(memo) = self.memo {
            memo.store_postings(term, fetched.clone());
        }
        Ok(fetched)
    }

    async fn total_page_count(&self) -> Result<i64> {
        if let Some(total) = self.memo.and_then(|m| m.cached_total()) {
            return Ok(total);
        }
        let total = self.store.total_page_count().await?;
        if let Some(memo) = self.memo {
            memo.store_total(total);
        }
        Ok(total)
    }
}

/// Score every posting of one term's posting list.
pub fn score_postings(
    strategy: ScoringStrategy,
    postings: &[Posting],
    total_pages: i64,
) -> Vec<(&Posting, f64)> {
    let n = total_pages as f64;
    let df = postings.len() as f64;

    match strategy {
        ScoringStrategy::Raw => postings.iter().map(|p| (p, p.tf as f64)).collect(),
        ScoringStrategy::TfIdf => {
            let idf = (n / (1.0 + df)).log10();
            postings
                .iter()
                .map(|p| {
                    let tf = if p.all_term_num > 0 {
                        p.tf as f64 / p.all_term_num as f64
                    } else {
                        0.0
                    };
                    (p, idf * tf)
                })
                .collect()
        }
        ScoringStrategy::Bm25 => {
            if postings.is_empty() {
                return Vec::new();
            }
            let idf = ((n - df + 0.5) / (df + 0.5)).log10();
            let avgdl = postings.iter().map(|p| p.all_term_num as f64).sum::<f64>() / df;
            postings
                .iter()
                .map(|p| {
                    let tf = p.tf as f64;
                    let length_ratio = if avgdl > 0.0 {
                        p.all_term_num as f64 / avgdl
                    } else {
                        1.0
                    };
                    let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_ratio);
                    (p, idf * tf * (BM25_K1 + 1.0) / norm)
                })
                .collect()
        }
    }
}
