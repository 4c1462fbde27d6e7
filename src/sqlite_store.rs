//! SQLite-backed [`IndexStore`] implementation.
//!
//! Pages live in `pages`, the per-page term counts in `term_freqs`, and the
//! symmetric correlation matrix in `term_correlations`. A posting's
//! `all_term_num` is computed with a `SUM(tf)` aggregate at query time, so
//! it always reflects the rows currently stored for the page.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use deckindex_core::models::{FileKind, FileLib, Page, Posting, SearchHistoryEntry, TermFreqMap};
use deckindex_core::store::IndexStore;

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Row counts reported by `dix stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub files: i64,
    pub pages: i64,
    pub term_rows: i64,
    pub distinct_terms: i64,
    pub correlations: i64,
    pub searches: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(DISTINCT ori_file_path) FROM pages) AS files,
                (SELECT COUNT(*) FROM pages) AS pages,
                (SELECT COUNT(*) FROM term_freqs) AS term_rows,
                (SELECT COUNT(DISTINCT term) FROM term_freqs) AS distinct_terms,
                (SELECT COUNT(*) FROM term_correlations) AS correlations,
                (SELECT COUNT(*) FROM search_history) AS searches
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            files: row.get("files"),
            pages: row.get("pages"),
            term_rows: row.get("term_rows"),
            distinct_terms: row.get("distinct_terms"),
            correlations: row.get("correlations"),
            searches: row.get("searches"),
        })
    }

    /// Files already processed by the pipeline, with the mtime seen then.
    pub async fn indexed_files(&self) -> Result<FileLib> {
        let rows = sqlx::query("SELECT rel_path, last_modified_ms FROM library_files")
            .fetch_all(&self.pool)
            .await?;

        let mut lib = FileLib::new();
        for row in &rows {
            let rel: String = row.get("rel_path");
            if !lib.insert(&rel, row.get("last_modified_ms")) {
                tracing::warn!(path = %rel, "ignoring unclassifiable manifest entry");
            }
        }
        Ok(lib)
    }

    pub async fn record_indexed_file(
        &self,
        kind: FileKind,
        rel_path: &str,
        last_modified_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_files (rel_path, kind, last_modified_ms) VALUES (?, ?, ?)
            ON CONFLICT(rel_path) DO UPDATE SET
                kind = excluded.kind,
                last_modified_ms = excluded.last_modified_ms
            "#,
        )
        .bind(rel_path)
        .bind(kind.dir())
        .bind(last_modified_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn forget_indexed_file(&self, rel_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM library_files WHERE rel_path = ?")
            .bind(rel_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every indexed row, the manifest included. Search history is kept.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["term_correlations", "term_freqs", "pages", "library_files"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Most recent searches, newest first.
    pub async fn recent_searches(&self, limit: i64) -> Result<Vec<SearchHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT searched_at, terms_json, raw_query FROM search_history ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SearchHistoryEntry> {
                let ts: i64 = row.get("searched_at");
                let terms_json: String = row.get("terms_json");
                Ok(SearchHistoryEntry {
                    searched_at: chrono::DateTime::from_timestamp_millis(ts).unwrap_or_default(),
                    terms: serde_json::from_str(&terms_json)?,
                    raw_query: row.get("raw_query"),
                })
            })
            .collect()
    }
}

fn page_from_row(row: &sqlx::sqlite::SqliteRow) -> Page {
    Page {
        file_id: row.get("file_id"),
        doc_id: row.get("doc_id"),
        ori_file_path: row.get("ori_file_path"),
        page_idx: row.get("page_idx"),
        img_path: row.get("img_path"),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn upsert_page(&self, page: &Page) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pages (doc_id, file_id, ori_file_path, page_idx, img_path)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                file_id = excluded.file_id,
                ori_file_path = excluded.ori_file_path,
                page_idx = excluded.page_idx,
                img_path = excluded.img_path
            "#,
        )
        .bind(&page.doc_id)
        .bind(&page.file_id)
        .bind(&page.ori_file_path)
        .bind(page.page_idx)
        .bind(&page.img_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_term_frequencies(&self, doc_id: &str, terms: &TermFreqMap) -> Result<()> {
        for (term, tf) in terms {
            sqlx::query(
                r#"
                INSERT INTO term_freqs (doc_id, term, tf) VALUES (?, ?, ?)
                ON CONFLICT(doc_id, term) DO UPDATE SET tf = excluded.tf
                "#,
            )
            .bind(doc_id)
            .bind(term)
            .bind(tf)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn delete_pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT doc_id, file_id, ori_file_path, page_idx, img_path
            FROM pages WHERE ori_file_path = ?
            ORDER BY page_idx
            "#,
        )
        .bind(ori_file_path)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM term_freqs WHERE doc_id IN (SELECT doc_id FROM pages WHERE ori_file_path = ?)",
        )
        .bind(ori_file_path)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pages WHERE ori_file_path = ?")
            .bind(ori_file_path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(rows.iter().map(page_from_row).collect())
    }

    async fn pages_by_original_path(&self, ori_file_path: &str) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, file_id, ori_file_path, page_idx, img_path
            FROM pages WHERE ori_file_path = ?
            ORDER BY page_idx
            "#,
        )
        .bind(ori_file_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(page_from_row).collect())
    }

    async fn pages_by_term(&self, term: &str) -> Result<Vec<Posting>> {
        let rows = sqlx::query(
            r#"
            SELECT p.doc_id, p.file_id, p.ori_file_path, p.page_idx, p.img_path,
                   t.tf AS tf,
                   (SELECT SUM(a.tf) FROM term_freqs a WHERE a.doc_id = p.doc_id) AS all_term_num
            FROM term_freqs t
            JOIN pages p ON p.doc_id = t.doc_id
            WHERE t.term = ?
            ORDER BY p.ori_file_path, p.page_idx
            "#,
        )
        .bind(term)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Posting {
                page: page_from_row(row),
                tf: row.get("tf"),
                all_term_num: row.get("all_term_num"),
            })
            .collect())
    }

    async fn total_page_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn terms_of_page(&self, doc_id: &str) -> Result<Vec<String>> {
        let terms: Vec<String> =
            sqlx::query_scalar("SELECT term FROM term_freqs WHERE doc_id = ? ORDER BY term")
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(terms)
    }

    async fn update_term_correlation(
        &self,
        term_a: &str,
        term_b: &str,
        score: f64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (t1, t2) in [(term_a, term_b), (term_b, term_a)] {
            sqlx::query(
                r#"
                INSERT INTO term_correlations (term1, term2, score) VALUES (?, ?, ?)
                ON CONFLICT(term1, term2) DO UPDATE SET score = excluded.score
                "#,
            )
            .bind(t1)
            .bind(t2)
            .bind(score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn closest_terms(&self, term: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT term2, score FROM term_correlations
            WHERE term1 = ?
            ORDER BY score DESC, term2
            LIMIT ?
            "#,
        )
        .bind(term)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("term2"), row.get("score")))
            .collect())
    }

    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()> {
        sqlx::query("INSERT INTO search_history (searched_at, terms_json, raw_query) VALUES (?, ?, ?)")
            .bind(entry.searched_at.timestamp_millis())
            .bind(serde_json::to_string(&entry.terms)?)
            .bind(&entry.raw_query)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use deckindex_core::ids;
    use deckindex_core::rank::{Ranker, ScoringStrategy};

    async fn open(dir: &tempfile::TempDir) -> SqliteStore {
        let pool = db::connect_path(&dir.path().join("index.sqlite"), 2)
            .await
            .unwrap();
        migrate::migrate(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn page(ori: &str, idx: i64) -> Page {
        Page {
            file_id: ids::file_id(ori),
            doc_id: ids::doc_id(ori, idx),
            ori_file_path: ori.to_string(),
            page_idx: idx,
            img_path: format!("img/{}.png", ids::doc_id(ori, idx)),
        }
    }

    fn tfs(pairs: &[(&str, i64)]) -> TermFreqMap {
        pairs.iter().map(|(t, n)| (t.to_string(), *n)).collect()
    }

    #[tokio::test]
    async fn test_postings_carry_tf_and_page_total() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let p1 = page("pptx/a.pptx", 1);
        let p2 = page("pptx/a.pptx", 2);
        store.upsert_page(&p1).await.unwrap();
        store.upsert_page(&p2).await.unwrap();
        store
            .upsert_term_frequencies(&p1.doc_id, &tfs(&[("apple", 3), ("pear", 2)]))
            .await
            .unwrap();
        store
            .upsert_term_frequencies(&p2.doc_id, &tfs(&[("apple", 1)]))
            .await
            .unwrap();

        let postings = store.pages_by_term("apple").await.unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].page, p1);
        assert_eq!(postings[0].tf, 3);
        assert_eq!(postings[0].all_term_num, 5);
        assert_eq!(postings[1].all_term_num, 1);

        assert!(store.pages_by_term("plum").await.unwrap().is_empty());
        assert_eq!(store.total_page_count().await.unwrap(), 2);
        assert_eq!(
            store.terms_of_page(&p1.doc_id).await.unwrap(),
            vec!["apple".to_string(), "pear".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_by_original_path_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let kept = page("pdf/keep.pdf", 1);
        let gone = page("docx/gone.docx", 1);
        for p in [&kept, &gone] {
            store.upsert_page(p).await.unwrap();
            store
                .upsert_term_frequencies(&p.doc_id, &tfs(&[("shared", 1)]))
                .await
                .unwrap();
        }

        let deleted = store
            .delete_pages_by_original_path("docx/gone.docx")
            .await
            .unwrap();
        assert_eq!(deleted, vec![gone.clone()]);

        let postings = store.pages_by_term("shared").await.unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].page.doc_id, kept.doc_id);
        assert!(store.terms_of_page(&gone.doc_id).await.unwrap().is_empty());
        assert!(store
            .pages_by_original_path("docx/gone.docx")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let p = page("pdf/x.pdf", 1);
        for _ in 0..2 {
            store.upsert_page(&p).await.unwrap();
            store
                .upsert_term_frequencies(&p.doc_id, &tfs(&[("x", 4)]))
                .await
                .unwrap();
        }
        assert_eq!(store.total_page_count().await.unwrap(), 1);
        assert_eq!(store.pages_by_term("x").await.unwrap()[0].tf, 4);
    }

    #[tokio::test]
    async fn test_correlations_are_symmetric_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store.update_term_correlation("a", "b", 0.5).await.unwrap();
        store.update_term_correlation("a", "c", 0.9).await.unwrap();
        store.update_term_correlation("a", "b", 0.7).await.unwrap();

        assert_eq!(
            store.closest_terms("a", 5).await.unwrap(),
            vec![("c".to_string(), 0.9), ("b".to_string(), 0.7)]
        );
        assert_eq!(
            store.closest_terms("b", 5).await.unwrap(),
            vec![("a".to_string(), 0.7)]
        );
        assert_eq!(store.closest_terms("a", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_round_trips_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store
            .record_indexed_file(FileKind::SlideDeck, "pptx/a.pptx", 10)
            .await
            .unwrap();
        store
            .record_indexed_file(FileKind::SlideDeck, "pptx/a.pptx", 20)
            .await
            .unwrap();
        store
            .record_indexed_file(FileKind::Pdf, "pdf/b.pdf", 5)
            .await
            .unwrap();
        store.forget_indexed_file("pdf/b.pdf").await.unwrap();

        let lib = store.indexed_files().await.unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get(FileKind::SlideDeck, "pptx/a.pptx"), Some(20));

        let p = page("pptx/a.pptx", 1);
        store.upsert_page(&p).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.total_page_count().await.unwrap(), 0);
        assert!(store.indexed_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_history_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let entry = SearchHistoryEntry {
            searched_at: chrono::DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            terms: vec!["q4".to_string(), "revenue".to_string()],
            raw_query: "Q4 revenue".to_string(),
        };
        store.record_search(&entry).await.unwrap();

        assert_eq!(store.recent_searches(10).await.unwrap(), vec![entry]);
        assert_eq!(store.stats().await.unwrap().searches, 1);
    }

    #[tokio::test]
    async fn test_ranker_over_sqlite_matches_raw_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let a = page("pptx/a.pptx", 1);
        let b = page("pptx/b.pptx", 1);
        store.upsert_page(&a).await.unwrap();
        store.upsert_page(&b).await.unwrap();
        store
            .upsert_term_frequencies(&a.doc_id, &tfs(&[("x", 3)]))
            .await
            .unwrap();
        store
            .upsert_term_frequencies(&b.doc_id, &tfs(&[("x", 1), ("y", 1)]))
            .await
            .unwrap();

        let ranked = Ranker::new(&store, ScoringStrategy::Raw)
            .rank(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        let order: Vec<(&str, f64)> = ranked
            .iter()
            .map(|r| (r.ori_file_path.as_str(), r.score))
            .collect();
        assert_eq!(order, vec![("pptx/a.pptx", 3.0), ("pptx/b.pptx", 1.0)]);
    }
}
