//! Index statistics overview for `dix stats`.

use anyhow::Result;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = store.stats().await?;
    let recent = store.recent_searches(5).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("deckindex — Index Stats");
    println!("=======================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Strategy:      {}", config.ranking.strategy);
    println!();
    println!("  Files:         {}", stats.files);
    println!("  Pages:         {}", stats.pages);
    println!(
        "  Term rows:     {} ({} distinct terms)",
        stats.term_rows, stats.distinct_terms
    );
    println!("  Correlations:  {}", stats.correlations);
    println!("  Searches:      {}", stats.searches);

    if !recent.is_empty() {
        println!();
        println!("  Recent searches:");
        for entry in &recent {
            println!(
                "    {}  {}",
                entry.searched_at.format("%Y-%m-%d %H:%M"),
                entry.raw_query
            );
        }
    }

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
