use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deckindex_core::rank::ScoringStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulersConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    /// Local mirror holding `pptx/`, `docx/`, `pdf/` and the derived
    /// `png/` and `img/` folders.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Synchronized remote folder. Without it, sync cycles diff the local
    /// mirror against the index baseline only.
    #[serde(default)]
    pub remote_root: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    15 * 60
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Concurrency slots and soft timeout of one scheduler category.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub timeout_secs: u64,
}

fn default_concurrency() -> usize {
    1
}

impl SchedulerConfig {
    fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            concurrency: 1,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulersConfig {
    #[serde(default = "default_convert")]
    pub convert: SchedulerConfig,
    #[serde(default = "default_extract")]
    pub extract: SchedulerConfig,
    #[serde(default = "default_tokenize")]
    pub tokenize: SchedulerConfig,
}

fn default_convert() -> SchedulerConfig {
    SchedulerConfig::with_timeout(150)
}
fn default_extract() -> SchedulerConfig {
    SchedulerConfig::with_timeout(5 * 60)
}
fn default_tokenize() -> SchedulerConfig {
    SchedulerConfig::with_timeout(60)
}

impl Default for SchedulersConfig {
    fn default() -> Self {
        Self {
            convert: default_convert(),
            extract: default_extract(),
            tokenize: default_tokenize(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RankingConfig {
    #[serde(default)]
    pub strategy: ScoringStrategy,
    /// Maintain term correlations on ingest. Off by default: each update
    /// costs O(postings²) store reads.
    #[serde(default)]
    pub term_correlation: bool,
    /// Correlated neighbours added per query term (0 = off).
    #[serde(default)]
    pub expand_correlated: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_return")]
    pub default_max_return: usize,
    #[serde(default = "default_max_return_limit")]
    pub max_return_limit: usize,
}

fn default_bind() -> String {
    "127.0.0.1:7055".to_string()
}
fn default_max_return() -> usize {
    20
}
fn default_max_return_limit() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_max_return: default_max_return(),
            max_return_limit: default_max_return_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_office_command")]
    pub office_command: String,
    /// Empty disables page-image rendering.
    #[serde(default = "default_render_command")]
    pub render_command: String,
    #[serde(default = "default_render_density")]
    pub render_density: u32,
    /// External tokenizer argv; the text is appended as the last argument
    /// and a JSON `{term: count}` object is expected on stdout. Empty uses
    /// the built-in tokenizer.
    #[serde(default)]
    pub tokenizer_command: Vec<String>,
}

fn default_office_command() -> String {
    "soffice".to_string()
}
fn default_render_command() -> String {
    "pdftoppm".to_string()
}
fn default_render_density() -> u32 {
    100
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            office_command: default_office_command(),
            render_command: default_render_command(),
            render_density: default_render_density(),
            tokenizer_command: Vec::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.pool_size == 0 {
        anyhow::bail!("db.pool_size must be >= 1");
    }

    if config.sync.poll_interval_secs == 0 {
        anyhow::bail!("sync.poll_interval_secs must be >= 1");
    }

    for (name, sched) in [
        ("convert", &config.scheduler.convert),
        ("extract", &config.scheduler.extract),
        ("tokenize", &config.scheduler.tokenize),
    ] {
        if sched.concurrency == 0 {
            anyhow::bail!("scheduler.{}.concurrency must be >= 1", name);
        }
        if sched.timeout_secs == 0 {
            anyhow::bail!("scheduler.{}.timeout_secs must be >= 1", name);
        }
    }

    if config.server.default_max_return == 0 {
        anyhow::bail!("server.default_max_return must be >= 1");
    }
    if config.server.default_max_return > config.server.max_return_limit {
        anyhow::bail!(
            "server.default_max_return ({}) must not exceed server.max_return_limit ({})",
            config.server.default_max_return,
            config.server.max_return_limit
        );
    }

    Ok(config)
}
