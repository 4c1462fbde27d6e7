//! # deckindex CLI (`dix`)
//!
//! ## Usage
//!
//! ```bash
//! dix --config ./config/dix.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dix init` | Create the database schema and library folders |
//! | `dix sync` | Run one pull + index cycle |
//! | `dix watch` | Run sync cycles every `sync.poll_interval_secs` |
//! | `dix search "<query>"` | Rank indexed pages |
//! | `dix serve` | Start the HTTP API (with background sync) |
//! | `dix stats` | Print index statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use deckindex::config;
use deckindex::library::Library;
use deckindex_core::rank::ScoringStrategy;

/// deckindex: page-level search over slide decks, word documents and PDFs.
#[derive(Parser)]
#[command(name = "dix", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dix.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and library folders. Idempotent.
    Init,

    /// Pull from the remote folder (if configured) and index changes once.
    Sync,

    /// Run sync cycles forever.
    Watch,

    /// Search indexed pages.
    Search {
        /// Free-text query.
        query: String,

        /// Maximum number of pages (clamped to `server.max_return_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Override the configured ranking strategy: raw, tfidf, or bm25.
        #[arg(long)]
        strategy: Option<ScoringStrategy>,
    },

    /// Start the HTTP query API.
    Serve {
        /// Serve queries only; do not run the background sync loop.
        #[arg(long)]
        no_sync: bool,
    },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            deckindex::migrate::run_migrations(&cfg).await?;
            Library::new(&cfg.library.root).ensure_layout()?;
            println!("Database initialized successfully.");
        }
        Commands::Sync => {
            deckindex::sync::run_sync(&cfg).await?;
        }
        Commands::Watch => {
            deckindex::sync::run_watch(&cfg).await?;
        }
        Commands::Search {
            query,
            limit,
            strategy,
        } => {
            deckindex::search::run_search(&cfg, &query, limit, strategy).await?;
        }
        Commands::Serve { no_sync } => {
            deckindex::server::run_server(&cfg, no_sync).await?;
        }
        Commands::Stats => {
            deckindex::stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
