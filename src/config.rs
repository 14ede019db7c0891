//! TOML configuration.
//!
//! Only `[db]` and `[server]` are required; every other section falls back
//! to the defaults below. See `config/devfeed.example.toml`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use devfeed_core::cache::CacheTtls;
use devfeed_core::feed::FeedParams;
use devfeed_core::profile::ProfileParams;
use devfeed_core::recompute::RecomputeParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Minimum dwell for a "long" view. 0 counts every view.
    #[serde(default = "default_long_view_secs")]
    pub long_view_secs: u32,
    /// A comment longer than this is "long". 0 counts every comment.
    #[serde(default = "default_long_comment_chars")]
    pub long_comment_chars: usize,
    #[serde(default = "default_top_snapshot_size")]
    pub top_snapshot_size: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            long_view_secs: default_long_view_secs(),
            long_comment_chars: default_long_comment_chars(),
            top_snapshot_size: default_top_snapshot_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_max_concurrency() -> usize {
    25
}
fn default_long_view_secs() -> u32 {
    120
}
fn default_long_comment_chars() -> usize {
    100
}
fn default_top_snapshot_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_candidate_pool_size")]
    pub candidate_pool_size: usize,
    #[serde(default = "default_generic_pool_size")]
    pub generic_pool_size: usize,
    #[serde(default = "default_exclude_viewed_days")]
    pub exclude_viewed_days: i64,
    #[serde(default = "default_profile_window")]
    pub profile_window: usize,
    #[serde(default = "default_profile_top_k")]
    pub profile_top_k: usize,
    #[serde(default = "default_relevance_top_n")]
    pub relevance_top_n: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            candidate_pool_size: default_candidate_pool_size(),
            generic_pool_size: default_generic_pool_size(),
            exclude_viewed_days: default_exclude_viewed_days(),
            profile_window: default_profile_window(),
            profile_top_k: default_profile_top_k(),
            relevance_top_n: default_relevance_top_n(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_candidate_pool_size() -> usize {
    50
}
fn default_generic_pool_size() -> usize {
    100
}
fn default_exclude_viewed_days() -> i64 {
    7
}
fn default_profile_window() -> usize {
    100
}
fn default_profile_top_k() -> usize {
    20
}
fn default_relevance_top_n() -> usize {
    5
}
fn default_page_size() -> u32 {
    20
}
fn default_max_page_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_feed_ttl_secs")]
    pub feed_ttl_secs: u64,
    #[serde(default = "default_score_ttl_secs")]
    pub score_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            feed_ttl_secs: default_feed_ttl_secs(),
            score_ttl_secs: default_score_ttl_secs(),
        }
    }
}

fn default_feed_ttl_secs() -> u64 {
    300
}
fn default_score_ttl_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Seconds between background recomputation runs. 0 disables.
    #[serde(default = "default_recompute_interval_secs")]
    pub recompute_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recompute_interval_secs: default_recompute_interval_secs(),
        }
    }
}

fn default_recompute_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// When set, `POST /jobs/recompute` requires `Authorization: Bearer <secret>`.
    #[serde(default)]
    pub job_secret: Option<String>,
}

impl Config {
    /// Config with defaults for everything but the database path. Used by
    /// tests and embedders that do not read a file.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: path.into(),
                max_connections: default_max_connections(),
            },
            scoring: ScoringConfig::default(),
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:7440".to_string(),
                job_secret: None,
            },
        }
    }

    pub fn recompute_params(&self) -> RecomputeParams {
        RecomputeParams {
            batch_size: self.scoring.batch_size,
            max_concurrency: self.scoring.max_concurrency,
            long_view_secs: self.scoring.long_view_secs,
            long_comment_chars: self.scoring.long_comment_chars,
            top_snapshot_size: self.scoring.top_snapshot_size,
        }
    }

    pub fn feed_params(&self) -> FeedParams {
        FeedParams {
            candidate_pool_size: self.feed.candidate_pool_size,
            generic_pool_size: self.feed.generic_pool_size,
            exclude_viewed_days: self.feed.exclude_viewed_days,
            profile: ProfileParams {
                window: self.feed.profile_window,
                top_k: self.feed.profile_top_k,
            },
            relevance_top_n: self.feed.relevance_top_n,
            max_page_size: self.feed.max_page_size,
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            feed: Duration::from_secs(self.cache.feed_ttl_secs),
            score: Duration::from_secs(self.cache.score_ttl_secs),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        bail!("db.max_connections must be > 0");
    }

    if config.scoring.batch_size == 0 {
        bail!("scoring.batch_size must be > 0");
    }
    if config.scoring.max_concurrency == 0 {
        bail!("scoring.max_concurrency must be > 0");
    }

    if config.feed.max_page_size == 0 {
        bail!("feed.max_page_size must be > 0");
    }
    if config.feed.default_page_size == 0
        || config.feed.default_page_size > config.feed.max_page_size
    {
        bail!(
            "feed.default_page_size must be between 1 and feed.max_page_size ({})",
            config.feed.max_page_size
        );
    }
    if config.feed.exclude_viewed_days < 0 {
        bail!("feed.exclude_viewed_days must be >= 0");
    }
    if config.feed.candidate_pool_size == 0 || config.feed.generic_pool_size == 0 {
        bail!("feed pool sizes must be > 0");
    }

    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }

    Ok(())
}
