//! Storage abstraction for devfeed.
//!
//! The [`Store`] trait defines every read and write the ranking core needs:
//! count aggregations for the recomputation job, candidate pools for feed
//! assembly, interaction history for interest profiles, and the atomic
//! interaction mutations. Backends: SQLite (application crate) and
//! [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::feed::FeedFilter;
use crate::models::{
    Comment, ComputedScores, ContentItem, InteractionKind, InteractionRecord, ProfileInteraction,
    ScoringTarget, Tag, ToggleOutcome, TopScore, ViewerState,
};

/// Parameters for one candidate pool fetch.
///
/// Candidates are always approved items ordered by `final_score` desc
/// (ties by id asc).
#[derive(Debug, Clone)]
pub struct CandidateQuery<'a> {
    /// Item ids to leave out (recently viewed).
    pub exclude: &'a HashSet<String>,
    /// When set, only items carrying at least one of these tag ids.
    pub any_tag_ids: Option<&'a [String]>,
    pub limit: usize,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Used by |
/// |--------|---------|
/// | [`scoring_targets`](Store::scoring_targets) | recomputation job |
/// | [`count_interactions`](Store::count_interactions) | recomputation job |
/// | [`count_author_replies`](Store::count_author_replies) | recomputation job |
/// | [`count_comments`](Store::count_comments) | recomputation job |
/// | [`write_scores`](Store::write_scores) | recomputation job |
/// | [`refresh_top_scores`](Store::refresh_top_scores) | recomputation job |
/// | [`recent_interactions`](Store::recent_interactions) | interest profile |
/// | [`viewed_since`](Store::viewed_since) | feed exclusion set, view dedup |
/// | [`candidates`](Store::candidates) | personalized and generic feed |
/// | [`filtered_items`](Store::filtered_items) | filtered feed |
/// | [`toggle_interaction`](Store::toggle_interaction) | like / save handlers |
#[async_trait]
pub trait Store: Send + Sync {
    /// Approved items, minimal projection, in a stable order.
    async fn scoring_targets(&self) -> Result<Vec<ScoringTarget>>;

    /// Count interactions of `kind` on an item. For views, `min_dwell_secs`
    /// restricts the count to views with at least that much dwell time.
    async fn count_interactions(
        &self,
        item_id: &str,
        kind: InteractionKind,
        min_dwell_secs: Option<u32>,
    ) -> Result<u64>;

    /// Replies (comments with a parent) written by the item's owner.
    async fn count_author_replies(&self, item_id: &str, owner_id: &str) -> Result<u64>;

    /// Comments on an item, optionally only those longer than `min_chars`.
    async fn count_comments(&self, item_id: &str, min_chars: Option<usize>) -> Result<u64>;

    /// Persist the computed fields and stamp `last_scored_at`.
    async fn write_scores(
        &self,
        item_id: &str,
        scores: &ComputedScores,
        scored_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Rebuild the top-score snapshot. Returns the number of rows written.
    async fn refresh_top_scores(&self, limit: usize) -> Result<usize>;

    /// Read the top-score snapshot.
    async fn top_scores(&self, limit: usize) -> Result<Vec<TopScore>>;

    /// Most recent interactions of the given kinds by a user, newest
    /// first, each joined to the tag ids of its item.
    async fn recent_interactions(
        &self,
        user_id: &str,
        kinds: &[InteractionKind],
        limit: usize,
    ) -> Result<Vec<ProfileInteraction>>;

    /// Ids of items the user viewed strictly after `since`.
    async fn viewed_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<HashSet<String>>;

    /// One candidate pool for feed assembly.
    async fn candidates(&self, query: &CandidateQuery<'_>) -> Result<Vec<ContentItem>>;

    /// Approved items matching an explicit filter, sorted by its key.
    async fn filtered_items(
        &self,
        filter: &FeedFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>>;

    /// Which of `item_ids` the user currently likes or saves.
    async fn viewer_state(&self, user_id: &str, item_ids: &[String]) -> Result<ViewerState>;

    async fn upsert_tag(&self, tag: &Tag) -> Result<()>;

    /// Insert or update an item's identity, tags, and status. Counters are
    /// only taken from `item` on insert; on update they, like the computed
    /// fields, stay as the interaction handlers and the job left them.
    async fn upsert_item(&self, item: &ContentItem) -> Result<()>;

    /// Append a non-reversible interaction. A view also increments the
    /// item's view counter in the same unit of work.
    async fn append_interaction(&self, record: &InteractionRecord) -> Result<()>;

    /// Flip a like or save for (actor, item). The record change and the
    /// counter update commit together.
    async fn toggle_interaction(
        &self,
        actor_id: &str,
        item_id: &str,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) -> Result<ToggleOutcome>;

    /// Insert a comment, its comment interaction, and bump the counter,
    /// all in one unit of work.
    async fn add_comment(&self, comment: &Comment) -> Result<()>;
}
