//! Service facade shared by the CLI, HTTP server, and scheduler.
//!
//! [`FeedService`] owns the store handle, the cache, and the tuning
//! parameters. It is built once in the entry point and passed by `Arc` to
//! whatever needs it. Feed and score reads go through the cache; mutations
//! (see [`crate::interactions`]) invalidate the entity groups they affect.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use devfeed_core::cache::{Cache, CacheKey, Entity, MemoryCache};
use devfeed_core::feed::{self, FeedFilter, FeedPage, FeedParams, FeedRequest, SortKey};
use devfeed_core::models::{ProjectType, ScoreView, TopScore};
use devfeed_core::recompute::{self, JobReport, RecomputeParams};
use devfeed_core::store::Store;
use devfeed_core::{FeedError, FeedResult};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Tuning parameters carried by the service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub feed: FeedParams,
    pub recompute: RecomputeParams,
    pub default_page_size: u32,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            feed: config.feed_params(),
            recompute: config.recompute_params(),
            default_page_size: config.feed.default_page_size,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            feed: FeedParams::default(),
            recompute: RecomputeParams::default(),
            default_page_size: 20,
        }
    }
}

pub struct FeedService {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) cache: Cache,
    settings: ServiceSettings,
}

impl FeedService {
    pub fn new(store: Arc<dyn Store>, cache: Cache, settings: ServiceSettings) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    /// SQLite-backed service with an in-process cache, as configured.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        let cache = Cache::new(Arc::new(MemoryCache::new()), config.cache_ttls());
        Ok(Self::new(
            Arc::new(SqliteStore::new(pool)),
            cache,
            ServiceSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// The cache key a request's page is stored under.
    pub fn feed_cache_key(req: &FeedRequest) -> CacheKey {
        if let Some(filter) = req.filter.as_ref().filter(|f| !f.is_empty()) {
            return CacheKey::FilteredFeed {
                filter_hash: filter.fingerprint(),
                page: req.page,
                page_size: req.page_size,
            };
        }
        match &req.user_id {
            Some(user_id) => CacheKey::PersonalFeed {
                user_id: user_id.clone(),
                page: req.page,
                page_size: req.page_size,
            },
            None => CacheKey::GenericFeed {
                page: req.page,
                page_size: req.page_size,
            },
        }
    }

    /// One page of the feed, cached, then annotated with the viewer's
    /// like/save state.
    pub async fn get_feed(&self, req: &FeedRequest, now: DateTime<Utc>) -> FeedResult<FeedPage> {
        let key = Self::feed_cache_key(req);
        let ttl = self.cache.ttl_for(&key);
        let store = self.store.as_ref();
        let params = &self.settings.feed;

        let mut page = self
            .cache
            .get_cached(&key, ttl, || feed::get_feed(store, req, params, now))
            .await?;

        if let Some(user_id) = req.user_id.as_deref() {
            let ids: Vec<String> = page.items.iter().map(|e| e.item.id.clone()).collect();
            let viewer = self.store.viewer_state(user_id, &ids).await?;
            for entry in &mut page.items {
                entry.has_liked = viewer.liked.contains(&entry.item.id);
                entry.has_saved = viewer.saved.contains(&entry.item.id);
            }
        }

        Ok(page)
    }

    /// Cached score read model. `None` when the item does not exist.
    pub async fn get_score(&self, item_id: &str) -> FeedResult<Option<ScoreView>> {
        let key = CacheKey::Score {
            item_id: item_id.to_string(),
        };
        let ttl = self.cache.ttl_for(&key);

        let result = self
            .cache
            .get_cached(&key, ttl, || async {
                match self.store.get_item(item_id).await? {
                    Some(item) => Ok::<_, FeedError>(ScoreView::from(&item)),
                    None => Err(FeedError::NotFound(format!("item {}", item_id))),
                }
            })
            .await;

        match result {
            Ok(view) => Ok(Some(view)),
            Err(FeedError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn top_scores(&self, limit: usize) -> FeedResult<Vec<TopScore>> {
        Ok(self.store.top_scores(limit).await?)
    }

    pub async fn invalidate(&self, entities: &[Entity]) -> usize {
        self.cache.invalidate_entities(entities).await
    }

    pub async fn run_recompute(&self, now: DateTime<Utc>) -> JobReport {
        let report =
            recompute::run_recompute(self.store.as_ref(), &self.settings.recompute, now).await;
        info!(
            success = report.success,
            scored = report.items_scored,
            failed = report.items_failed,
            "recompute job complete"
        );
        report
    }

    /// `NotFound` unless the item exists.
    pub(crate) async fn require_item(&self, item_id: &str) -> FeedResult<()> {
        match self.store.get_item(item_id).await? {
            Some(_) => Ok(()),
            None => Err(FeedError::NotFound(format!("item {}", item_id))),
        }
    }
}

/// Build a filter from the loose string form used by the CLI and the HTTP
/// query string. `tags` is comma-separated. Returns `None` when nothing is set.
pub fn parse_filter(
    tags: Option<&str>,
    project_type: Option<&str>,
    sort: Option<&str>,
) -> FeedResult<Option<FeedFilter>> {
    let tags: Vec<String> = tags
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let project_type = match project_type.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<ProjectType>()
                .map_err(|e| FeedError::InvalidRequest(e.to_string()))?,
        ),
        None => None,
    };
    let sort = match sort.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<SortKey>()
                .map_err(|e| FeedError::InvalidRequest(e.to_string()))?,
        ),
        None => None,
    };

    let filter = FeedFilter {
        tags,
        project_type,
        sort,
    };
    Ok((!filter.is_empty()).then_some(filter))
}
