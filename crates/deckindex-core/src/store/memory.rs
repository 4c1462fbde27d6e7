//! In-memory [`IndexStore`] implementation for tests and embedding.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock`. Posting lists are
//! computed by scanning every page's term map, which is fine for the small
//! corpora this backend is meant for.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Page, Posting, SearchHistoryEntry, TermFreqMap};

use super::IndexStore;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    pages: RwLock<HashMap<String, Page>>,
    term_freqs: RwLock<HashMap<String, TermFreqMap>>,
    correlations: RwLock<BTreeMap<(String, String), f64>>,
    history: RwLock<Vec<SearchHistoryEntry>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn page_order(a: &Page, b: &Page) -> std::cmp::Ordering {
    a.ori_file_path
        .cmp(&b.ori_file_path)
        .then(a.page_idx.cmp(&b.page_idx))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded search, oldest first.
    pub fn history(&self) -> Result<Vec<SearchHistoryEntry>> {
        Ok(read(&self.history)?.clone())
    }

    /// Stored correlation score for the directional pair `(term1, term2)`.
    pub fn correlation(&self, term1: &str, term2: &str) -> Result<Option<f64>> {
        Ok(read(&self.correlations)?
            .get(&(term1.to_string(), term2.to_string()))
            .copied())
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn upsert_page(&self, page: &Page) -> Result<()> {
        write(&self.pages)?.insert(page.doc_id.clone(), page.clone());
        Ok(())
    }

    async fn upsert_term_frequencies(&self, doc_id: &str, terms: &TermFreqMap) -> Result<()> {
        let mut freqs = write(&self.term_freqs)?;
        let entry = freqs.entry(doc_id.to_string()).or_default();
        for (term, tf) in terms {
            entry.insert(term.clone(), *tf);
        }
        Ok(())
    }

    async fn delete_pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>> {
        let mut pages = write(&self.pages)?;
        let mut deleted: Vec<Page> = pages
            .values()
            .filter(|p| p.ori_file_path == ori_file_path)
            .cloned()
            .collect();
        deleted.sort_by(page_order);

        let mut freqs = write(&self.term_freqs)?;
        for page in &deleted {
            pages.remove(&page.doc_id);
            freqs.remove(&page.doc_id);
        }
        Ok(deleted)
    }

    async fn pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>> {
        let mut found: Vec<Page> = read(&self.pages)?
            .values()
            .filter(|p| p.ori_file_path == ori_file_path)
            .cloned()
            .collect();
        found.sort_by(page_order);
        Ok(found)
    }

    async fn pages_by_term(&self, term: &str) -> Result<Vec<Posting>> {
        let pages = read(&self.pages)?;
        let freqs = read(&self.term_freqs)?;
        let mut postings: Vec<Posting> = freqs
            .iter()
            .filter_map(|(doc_id, terms)| {
                let tf = *terms.get(term)?;
                let page = pages.get(doc_id)?;
                Some(Posting {
                    page: page.clone(),
                    tf,
                    all_term_num: terms.values().sum(),
                })
            })
            .collect();
        postings.sort_by(|a, b| page_order(&a.page, &b.page));
        Ok(postings)
    }

    async fn total_page_count(&self) -> Result<i64> {
        Ok(read(&self.pages)?.len() as i64)
    }

    async fn terms_of_page(&self, doc_id: &str) -> Result<Vec<String>> {
        Ok(read(&self.term_freqs)?
            .get(doc_id)
            .map(|terms| terms.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_term_correlation(
        &self,
        term_a: &str,
        term_b: &str,
        score: f64,
    ) -> Result<()> {
        let mut correlations = write(&self.correlations)?;
        correlations.insert((term_a.to_string(), term_b.to_string()), score);
        correlations.insert((term_b.to_string(), term_a.to_string()), score);
        Ok(())
    }

    async fn closest_terms(&self, term: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        let mut neighbours: Vec<(String, f64)> = read(&self.correlations)?
            .iter()
            .filter(|((t1, _), _)| t1 == term)
            .map(|((_, t2), score)| (t2.clone(), *score))
            .collect();
        neighbours.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        neighbours.truncate(limit);
        Ok(neighbours)
    }

    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()> {
        write(&self.history)?.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;

    fn page(ori: &str, idx: i64) -> Page {
        Page {
            file_id: ids::file_id(ori),
            doc_id: ids::doc_id(ori, idx),
            ori_file_path: ori.to_string(),
            page_idx: idx,
            img_path: format!("img/{}.png", ids::doc_id(ori, idx)),
        }
    }

    fn terms(pairs: &[(&str, i64)]) -> TermFreqMap {
        pairs.iter().map(|(t, n)| (t.to_string(), *n)).collect()
    }

    #[tokio::test]
    async fn test_postings_carry_tf_and_total_term_count() {
        let store = InMemoryStore::new();
        let p = page("pdf/a.pdf", 1);
        store.upsert_page(&p).await.unwrap();
        store
            .upsert_term_frequencies(&p.doc_id, &terms(&[("x", 3), ("y", 1)]))
            .await
            .unwrap();

        let postings = store.pages_by_term("x").await.unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].tf, 3);
        assert_eq!(postings[0].all_term_num, 4);
        assert_eq!(postings[0].page, p);
    }

    #[tokio::test]
    async fn test_upsert_keeps_absent_terms() {
        let store = InMemoryStore::new();
        let p = page("pdf/a.pdf", 1);
        store.upsert_page(&p).await.unwrap();
        store
            .upsert_term_frequencies(&p.doc_id, &terms(&[("old", 2)]))
            .await
            .unwrap();
        store
            .upsert_term_frequencies(&p.doc_id, &terms(&[("new", 5)]))
            .await
            .unwrap();
        let mut t = store.terms_of_page(&p.doc_id).await.unwrap();
        t.sort();
        assert_eq!(t, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_delete_by_original_path_cascades() {
        let store = InMemoryStore::new();
        for idx in 1..=2 {
            let p = page("pptx/deck.pptx", idx);
            store.upsert_page(&p).await.unwrap();
            store
                .upsert_term_frequencies(&p.doc_id, &terms(&[("only", 1), ("shared", 1)]))
                .await
                .unwrap();
        }
        let other = page("pdf/other.pdf", 1);
        store.upsert_page(&other).await.unwrap();
        store
            .upsert_term_frequencies(&other.doc_id, &terms(&[("shared", 4)]))
            .await
            .unwrap();

        let deleted = store
            .delete_pages_by_original_path("pptx/deck.pptx")
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted[0].page_idx, 1);

        assert!(store.pages_by_term("only").await.unwrap().is_empty());
        assert_eq!(store.pages_by_term("shared").await.unwrap().len(), 1);
        assert_eq!(store.total_page_count().await.unwrap(), 1);
        assert!(store.terms_of_page(&deleted[0].doc_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_correlation_is_symmetric() {
        let store = InMemoryStore::new();
        store.update_term_correlation("a", "b", 0.5).await.unwrap();
        store.update_term_correlation("a", "c", 0.9).await.unwrap();
        assert_eq!(store.correlation("b", "a").unwrap(), Some(0.5));
        let closest = store.closest_terms("a", 5).await.unwrap();
        assert_eq!(closest, vec![("c".to_string(), 0.9), ("b".to_string(), 0.5)]);
        assert_eq!(store.closest_terms("a", 1).await.unwrap().len(), 1);
    }
}
