use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            doc_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            ori_file_path TEXT NOT NULL,
            page_idx INTEGER NOT NULL,
            img_path TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_ori_file_path ON pages(ori_file_path)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS term_freqs (
            doc_id TEXT NOT NULL,
            term TEXT NOT NULL,
            tf INTEGER NOT NULL,
            PRIMARY KEY (doc_id, term)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_term_freqs_term ON term_freqs(term)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS term_correlations (
            term1 TEXT NOT NULL,
            term2 TEXT NOT NULL,
            score REAL NOT NULL,
            PRIMARY KEY (term1, term2)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_term_correlations_score ON term_correlations(term1, score)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            searched_at INTEGER NOT NULL,
            terms_json TEXT NOT NULL,
            raw_query TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS library_files (
            rel_path TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            last_modified_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
