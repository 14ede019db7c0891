//! Feed assembly: personalized, generic, and filtered paths.
//!
//! All paths operate through the [`Store`] trait and take `now` from the
//! caller.
//!
//! # Personalized Path
//!
//! 1. Build the user's interest profile (empty ⇒ generic path).
//! 2. Collect items the user viewed in the last `exclude_viewed_days`.
//! 3. Fetch two candidate pools concurrently: global top by `final_score`,
//!    and items carrying any profile tag. Both exclude step 2.
//! 4. Union by id.
//! 5. `personalized = final × (1 + relevance)`.
//! 6. Sort by personalized score, diversify, paginate.
//!
//! # Generic Path
//!
//! Top `generic_pool_size` approved items by `final_score`, diversified
//! and paginated the same way.
//!
//! # Filtered Path
//!
//! Explicit tag/type/sort queries bypass ranking: exact matching (an item
//! must carry every requested tag), the requested sort key, and offset
//! pagination.

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::diversify::diversify;
use crate::error::{FeedError, FeedResult};
use crate::models::{ContentItem, InterestTag, PrimaryTag, ProjectType};
use crate::profile::{self, ProfileParams};
use crate::store::{CandidateQuery, Store};

/// Sort orders accepted by the filtered path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Score,
    Newest,
    MostLiked,
    MostSaved,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Score => "score",
            SortKey::Newest => "newest",
            SortKey::MostLiked => "most_liked",
            SortKey::MostSaved => "most_saved",
        }
    }
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "score" => Ok(SortKey::Score),
            "newest" => Ok(SortKey::Newest),
            "most_liked" | "most-liked" => Ok(SortKey::MostLiked),
            "most_saved" | "most-saved" => Ok(SortKey::MostSaved),
            other => bail!(
                "unknown sort key: '{}'. Use score, newest, most_liked, or most_saved.",
                other
            ),
        }
    }
}

/// An explicit query from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Tag slugs; an item must carry all of them.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_type: Option<ProjectType>,
    #[serde(default)]
    pub sort: Option<SortKey>,
}

impl FeedFilter {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.project_type.is_none() && self.sort.is_none()
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort.unwrap_or_default()
    }

    /// Whether an approved item satisfies the tag and type constraints.
    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(pt) = self.project_type {
            if item.project_type != pt {
                return false;
            }
        }
        self.tags.iter().all(|slug| item.has_tag_slug(slug))
    }

    /// Stable short hash of the filter, used in cache keys.
    ///
    /// Tag order and duplicates do not change the fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();
        tags.dedup();

        let mut hasher = Sha256::new();
        hasher.update(tags.join(",").as_bytes());
        hasher.update(b"|");
        hasher.update(self.project_type.map(|p| p.as_str()).unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.sort.map(|s| s.as_str()).unwrap_or("").as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..8])
    }
}

/// Tuning knobs for feed assembly, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedParams {
    /// Cap on each personalized candidate pool.
    pub candidate_pool_size: usize,
    /// Size of the generic top-score pool.
    pub generic_pool_size: usize,
    /// Recently viewed items are excluded from personalized pools.
    pub exclude_viewed_days: i64,
    pub profile: ProfileParams,
    /// Number of top profile tags whose weights normalize relevance.
    pub relevance_top_n: usize,
    pub max_page_size: u32,
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            candidate_pool_size: 50,
            generic_pool_size: 100,
            exclude_viewed_days: 7,
            profile: ProfileParams::default(),
            relevance_top_n: 5,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedRequest {
    pub user_id: Option<String>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub filter: Option<FeedFilter>,
}

/// Which assembly path produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStrategy {
    Personalized,
    Generic,
    Filtered,
}

/// A content item placed in a feed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub item: ContentItem,
    /// Set on the personalized path only.
    #[serde(default)]
    pub personalized_score: Option<f64>,
    #[serde(default)]
    pub has_liked: bool,
    #[serde(default)]
    pub has_saved: bool,
}

impl FeedEntry {
    fn plain(item: ContentItem) -> Self {
        Self {
            item,
            personalized_score: None,
            has_liked: false,
            has_saved: false,
        }
    }
}

impl PrimaryTag for FeedEntry {
    fn primary_tag(&self) -> Option<&str> {
        self.item.primary_tag()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedEntry>,
    pub has_more: bool,
    pub page: u32,
    pub strategy: FeedStrategy,
}

/// Fraction of the user's top interests an item covers, in `[0, 1]`.
///
/// The denominator is the summed weight of the `top_n` heaviest profile
/// tags (or 1 if that sum is zero). Items matching nothing score 0.
pub fn relevance(item: &ContentItem, profile: &[InterestTag], top_n: usize) -> f64 {
    if profile.is_empty() {
        return 0.0;
    }

    let item_tags: HashSet<&str> = item.tags.iter().map(|t| t.id.as_str()).collect();
    let matched: f64 = profile
        .iter()
        .filter(|t| item_tags.contains(t.tag_id.as_str()))
        .map(|t| t.weight)
        .sum();

    let mut max_possible: f64 = profile.iter().take(top_n).map(|t| t.weight).sum();
    if max_possible <= 0.0 {
        max_possible = 1.0;
    }

    (matched / max_possible).clamp(0.0, 1.0)
}

pub fn personalized_score(final_score: f64, relevance: f64) -> f64 {
    final_score * (1.0 + relevance)
}

/// Slice `[(page-1)*size, page*size)` and report whether more remain.
pub fn paginate<T>(mut items: Vec<T>, page: u32, page_size: u32) -> (Vec<T>, bool) {
    let size = page_size as usize;
    let start = (page.saturating_sub(1) as usize).saturating_mul(size);
    let end = start.saturating_add(size);
    let has_more = end < items.len();

    if start >= items.len() {
        return (Vec::new(), false);
    }
    items.truncate(end);
    let page_items = items.split_off(start);
    (page_items, has_more)
}

fn validate(req: &FeedRequest, params: &FeedParams) -> FeedResult<()> {
    if req.page < 1 {
        return Err(FeedError::InvalidRequest("page must be >= 1".into()));
    }
    if req.page_size < 1 || req.page_size > params.max_page_size {
        return Err(FeedError::InvalidRequest(format!(
            "page_size must be between 1 and {}",
            params.max_page_size
        )));
    }
    Ok(())
}

/// Produce one page of the feed for a request.
///
/// A non-empty filter selects the filtered path; otherwise a user id
/// selects the personalized path and anonymous requests get the generic
/// path.
pub async fn get_feed<S: Store + ?Sized>(
    store: &S,
    req: &FeedRequest,
    params: &FeedParams,
    now: DateTime<Utc>,
) -> FeedResult<FeedPage> {
    validate(req, params)?;

    if let Some(filter) = req.filter.as_ref().filter(|f| !f.is_empty()) {
        return filtered_feed(store, filter, req.page, req.page_size).await;
    }

    match req.user_id.as_deref() {
        Some(user_id) => {
            personalized_feed(store, user_id, req.page, req.page_size, params, now).await
        }
        None => generic_feed(store, req.page, req.page_size, params).await,
    }
}

pub async fn personalized_feed<S: Store + ?Sized>(
    store: &S,
    user_id: &str,
    page: u32,
    page_size: u32,
    params: &FeedParams,
    now: DateTime<Utc>,
) -> FeedResult<FeedPage> {
    let interests = profile::interest_profile(store, user_id, &params.profile).await?;
    if interests.is_empty() {
        return generic_feed(store, page, page_size, params).await;
    }

    let since = now - Duration::days(params.exclude_viewed_days);
    let exclude = store.viewed_since(user_id, since).await?;
    let interest_tag_ids: Vec<String> = interests.iter().map(|t| t.tag_id.clone()).collect();

    let top_query = CandidateQuery {
        exclude: &exclude,
        any_tag_ids: None,
        limit: params.candidate_pool_size,
    };
    let tagged_query = CandidateQuery {
        exclude: &exclude,
        any_tag_ids: Some(&interest_tag_ids),
        limit: params.candidate_pool_size,
    };

    let (top, tagged) = futures::try_join!(
        store.candidates(&top_query),
        store.candidates(&tagged_query)
    )?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut scored: Vec<FeedEntry> = top
        .into_iter()
        .chain(tagged)
        .filter(|item| seen.insert(item.id.clone()))
        .map(|item| {
            let rel = relevance(&item, &interests, params.relevance_top_n);
            let score = personalized_score(item.scores.final_score, rel);
            FeedEntry {
                personalized_score: Some(score),
                ..FeedEntry::plain(item)
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.personalized_score
            .partial_cmp(&a.personalized_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let diversified = diversify(scored);
    let (items, has_more) = paginate(diversified, page, page_size);

    Ok(FeedPage {
        items,
        has_more,
        page,
        strategy: FeedStrategy::Personalized,
    })
}

pub async fn generic_feed<S: Store + ?Sized>(
    store: &S,
    page: u32,
    page_size: u32,
    params: &FeedParams,
) -> FeedResult<FeedPage> {
    let exclude = HashSet::new();
    let pool = store
        .candidates(&CandidateQuery {
            exclude: &exclude,
            any_tag_ids: None,
            limit: params.generic_pool_size,
        })
        .await?;

    let entries: Vec<FeedEntry> = pool.into_iter().map(FeedEntry::plain).collect();
    let (items, has_more) = paginate(diversify(entries), page, page_size);

    Ok(FeedPage {
        items,
        has_more,
        page,
        strategy: FeedStrategy::Generic,
    })
}

pub async fn filtered_feed<S: Store + ?Sized>(
    store: &S,
    filter: &FeedFilter,
    page: u32,
    page_size: u32,
) -> FeedResult<FeedPage> {
    let size = page_size as usize;
    let offset = (page.saturating_sub(1) as usize).saturating_mul(size);

    let mut rows = store.filtered_items(filter, offset, size + 1).await?;
    let has_more = rows.len() > size;
    rows.truncate(size);

    Ok(FeedPage {
        items: rows.into_iter().map(FeedEntry::plain).collect(),
        has_more,
        page,
        strategy: FeedStrategy::Filtered,
    })
}
