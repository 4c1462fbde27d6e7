use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tracing::warn;

use deckindex_core::models::{RankedPage, SearchHistoryEntry};
use deckindex_core::rank::{Ranker, ScoringStrategy, SearchMemo};
use deckindex_core::store::IndexStore;

use crate::config::Config;
use crate::scheduler::TaskScheduler;
use crate::sqlite_store::SqliteStore;
use crate::tokenize::{tokenizer_from_config, Tokenizer};
use crate::{db, migrate};

/// Holder of the current cycle's [`SearchMemo`].
///
/// Readers take an `Arc` to the memo of the cycle they started in; a sync
/// cycle finishing swaps in a fresh one, so no cached posting list outlives
/// the index state it was read from.
#[derive(Default)]
pub struct MemoSlot {
    current: RwLock<Arc<SearchMemo>>,
}

impl MemoSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<SearchMemo> {
        match self.current.read() {
            Ok(memo) => Arc::clone(&memo),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn reset(&self) {
        let fresh = Arc::new(SearchMemo::new());
        match self.current.write() {
            Ok(mut memo) => *memo = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}

/// Query path: tokenize → rank → record history.
///
/// Without a [`MemoSlot`] every query reads through a memo of its own, so
/// nothing is cached between requests. A slot is only worth sharing when a
/// sync loop in the same process resets it after each cycle.
pub struct Searcher {
    store: Arc<dyn IndexStore>,
    tokenizer: Arc<dyn Tokenizer>,
    scheduler: TaskScheduler,
    strategy: ScoringStrategy,
    expand_correlated: usize,
    memo: Option<Arc<MemoSlot>>,
}

impl Searcher {
    pub fn new(
        store: Arc<dyn IndexStore>,
        tokenizer: Arc<dyn Tokenizer>,
        scheduler: TaskScheduler,
        strategy: ScoringStrategy,
    ) -> Self {
        Self {
            store,
            tokenizer,
            scheduler,
            strategy,
            expand_correlated: 0,
            memo: None,
        }
    }

    pub fn with_correlation_expansion(mut self, neighbours: usize) -> Self {
        self.expand_correlated = neighbours;
        self
    }

    /// Share posting lists across queries until `memo` is reset.
    pub fn with_memo(mut self, memo: Arc<MemoSlot>) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn memo(&self) -> Option<&Arc<MemoSlot>> {
        self.memo.as_ref()
    }

    /// Query terms of `query`, sorted by descending frequency then term.
    pub async fn query_terms(&self, query: &str) -> Result<Vec<String>> {
        let tokenizer = Arc::clone(&self.tokenizer);
        let text = query.to_string();
        let freqs = self
            .scheduler
            .run(async move { tokenizer.tokenize(&text).await })
            .await?
            .context("query tokenization failed")?;

        let mut terms: Vec<(String, i64)> = freqs.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(terms.into_iter().map(|(t, _)| t).collect())
    }

    /// Up to `max_return` pages for `query`, best first. Any failure fails
    /// the whole query; recording the search is best-effort.
    pub async fn search(&self, query: &str, max_return: usize) -> Result<Vec<RankedPage>> {
        let terms = self.query_terms(query).await?;

        let mut pages = if terms.is_empty() {
            Vec::new()
        } else {
            let memo = match &self.memo {
                Some(slot) => slot.current(),
                None => Arc::new(SearchMemo::new()),
            };
            Ranker::new(self.store.as_ref(), self.strategy)
                .with_memo(&memo)
                .with_correlation_expansion(self.expand_correlated)
                .rank(&terms)
                .await?
        };
        pages.truncate(max_return);

        let entry = SearchHistoryEntry {
            searched_at: Utc::now(),
            terms,
            raw_query: query.to_string(),
        };
        if let Err(e) = self.store.record_search(&entry).await {
            warn!(error = %e, "failed to record search history");
        }

        Ok(pages)
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    strategy: Option<ScoringStrategy>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let searcher = Searcher::new(
        store,
        Arc::from(tokenizer_from_config(&config.tools)),
        TaskScheduler::from_config("tokenize", &config.scheduler.tokenize),
        strategy.unwrap_or(config.ranking.strategy),
    )
    .with_correlation_expansion(config.ranking.expand_correlated);

    let max_return = limit
        .unwrap_or(config.server.default_max_return)
        .min(config.server.max_return_limit);
    let pages = searcher.search(query, max_return).await?;

    if pages.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, page) in pages.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (page {})",
            i + 1,
            page.score,
            page.ori_file_path,
            page.page_idx
        );
        if !page.img_path.is_empty() {
            println!("    image: {}", page.img_path);
        }
        println!("    id: {}", page.doc_id);
        println!();
    }

    pool.close().await;
    Ok(())
}
