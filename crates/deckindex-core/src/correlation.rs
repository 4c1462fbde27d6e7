//! Term-to-term correlation.
//!
//! Correlation between two terms is the cosine similarity of their posting
//! vectors (one `tf` component per page). Refreshing one term touches every
//! term that co-occurs with it and re-reads both posting lists per pair, so
//! the cost grows with the square of posting-list size. Maintenance is
//! therefore opt-in (`ranking.term_correlation`).

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};

use crate::models::Posting;
use crate::store::IndexStore;

/// Cosine similarity of two posting lists, matched by `doc_id`.
///
/// An empty list is treated as having unit length, so the result is 0.0
/// rather than NaN.
pub fn cosine_correlation(a: &[Posting], b: &[Posting]) -> f64 {
    let b_tf: HashMap<&str, i64> = b
        .iter()
        .map(|p| (p.page.doc_id.as_str(), p.tf))
        .collect();

    let dot: f64 = a
        .iter()
        .map(|p| (p.tf * b_tf.get(p.page.doc_id.as_str()).copied().unwrap_or(0)) as f64)
        .sum();

    let length = |list: &[Posting]| {
        let l = list.iter().map(|p| (p.tf * p.tf) as f64).sum::<f64>().sqrt();
        if l > 0.0 {
            l
        } else {
            1.0
        }
    };

    dot / length(a) / length(b)
}

/// Recompute and store the correlation between `term` and every term that
/// shares a page with it. Returns the number of pairs written.
pub async fn refresh_term_correlations<S: IndexStore + ?Sized>(
    store: &S,
    term: &str,
) -> Result<usize> {
    let postings = store.pages_by_term(term).await?;

    let mut neighbours: BTreeSet<String> = BTreeSet::new();
    for posting in &postings {
        for other in store.terms_of_page(&posting.page.doc_id).await? {
            if other != term {
                neighbours.insert(other);
            }
        }
    }

    for other in &neighbours {
        let other_postings = store.pages_by_term(other).await?;
        let score = cosine_correlation(&other_postings, &postings);
        store.update_term_correlation(other, term, score).await?;
    }

    Ok(neighbours.len())
}
