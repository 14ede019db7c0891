//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All state sits behind a single `std::sync::RwLock`, so each mutation
//! (record + counter) is applied atomically with respect to readers.
//! Fault injection hooks let tests simulate an unavailable backend or
//! per-item failures during recomputation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::feed::{FeedFilter, SortKey};
use crate::models::{
    Comment, ComputedScores, ContentItem, ContentStatus, InteractionKind, InteractionMeta,
    InteractionRecord, ProfileInteraction, ScoringTarget, Tag, ToggleOutcome, TopScore,
    ViewerState,
};

use super::{CandidateQuery, Store};

#[derive(Default)]
struct State {
    tags: HashMap<String, Tag>,
    // BTreeMap keeps iteration order stable by id.
    items: BTreeMap<String, ContentItem>,
    interactions: Vec<InteractionRecord>,
    comments: Vec<Comment>,
    top_scores: Vec<TopScore>,
}

/// In-memory store backed by plain collections.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    snapshot_broken: AtomicBool,
    failing_items: RwLock<HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `refresh_top_scores` fail until reset.
    pub fn set_snapshot_broken(&self, broken: bool) {
        self.snapshot_broken.store(broken, Ordering::SeqCst);
    }

    /// Make count aggregations and score writes fail for one item.
    pub fn fail_item(&self, item_id: &str) {
        if let Ok(mut failing) = self.failing_items.write() {
            failing.insert(item_id.to_string());
        }
    }

    /// Number of stored interaction rows (all kinds).
    pub fn interaction_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.interactions.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    fn check_item(&self, item_id: &str) -> Result<()> {
        self.check_available()?;
        let failing = self
            .failing_items
            .read()
            .map_err(|_| anyhow!("failure registry lock poisoned"))?;
        if failing.contains(item_id) {
            bail!("simulated failure for item {}", item_id);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.check_available()?;
        self.state.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.check_available()?;
        self.state.write().map_err(|_| anyhow!("store lock poisoned"))
    }
}

fn by_score_then_id(a: &ContentItem, b: &ContentItem) -> std::cmp::Ordering {
    b.scores
        .final_score
        .partial_cmp(&a.scores.final_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

fn sort_filtered(items: &mut [&ContentItem], key: SortKey) {
    items.sort_by(|a, b| {
        let primary = match key {
            SortKey::Score => return by_score_then_id(a, b),
            SortKey::Newest => b.submitted_at.cmp(&a.submitted_at),
            SortKey::MostLiked => b.counters.likes.cmp(&a.counters.likes),
            SortKey::MostSaved => b.counters.saves.cmp(&a.counters.saves),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn scoring_targets(&self) -> Result<Vec<ScoringTarget>> {
        let state = self.read()?;
        Ok(state
            .items
            .values()
            .filter(|i| i.status == ContentStatus::Approved)
            .map(|i| ScoringTarget {
                id: i.id.clone(),
                owner_id: i.owner_id.clone(),
                submitted_at: i.submitted_at,
            })
            .collect())
    }

    async fn count_interactions(
        &self,
        item_id: &str,
        kind: InteractionKind,
        min_dwell_secs: Option<u32>,
    ) -> Result<u64> {
        self.check_item(item_id)?;
        let state = self.read()?;
        let count = state
            .interactions
            .iter()
            .filter(|r| r.item_id == item_id && r.kind == kind)
            .filter(|r| match min_dwell_secs {
                Some(min) => r.meta.dwell_secs().unwrap_or(0) >= min,
                None => true,
            })
            .count();
        Ok(count as u64)
    }

    async fn count_author_replies(&self, item_id: &str, owner_id: &str) -> Result<u64> {
        self.check_item(item_id)?;
        let state = self.read()?;
        let count = state
            .comments
            .iter()
            .filter(|c| c.item_id == item_id && c.author_id == owner_id && c.parent_id.is_some())
            .count();
        Ok(count as u64)
    }

    async fn count_comments(&self, item_id: &str, min_chars: Option<usize>) -> Result<u64> {
        self.check_item(item_id)?;
        let state = self.read()?;
        let count = state
            .comments
            .iter()
            .filter(|c| c.item_id == item_id)
            .filter(|c| match min_chars {
                Some(min) => c.body.chars().count() > min,
                None => true,
            })
            .count();
        Ok(count as u64)
    }

    async fn write_scores(
        &self,
        item_id: &str,
        scores: &ComputedScores,
        scored_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_item(item_id)?;
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| anyhow!("item not found: {}", item_id))?;
        item.scores = *scores;
        item.last_scored_at = Some(scored_at);
        Ok(())
    }

    async fn refresh_top_scores(&self, limit: usize) -> Result<usize> {
        if self.snapshot_broken.load(Ordering::SeqCst) {
            bail!("top score snapshot refresh failed");
        }
        let mut state = self.write()?;
        let mut ranked: Vec<&ContentItem> = state
            .items
            .values()
            .filter(|i| i.status == ContentStatus::Approved)
            .collect();
        ranked.sort_by(|a, b| by_score_then_id(a, b));

        let snapshot: Vec<TopScore> = ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, item)| TopScore {
                rank: i as i64 + 1,
                item_id: item.id.clone(),
                title: item.title.clone(),
                engagement_score: item.scores.engagement_score,
                final_score: item.scores.final_score,
            })
            .collect();
        let written = snapshot.len();
        state.top_scores = snapshot;
        Ok(written)
    }

    async fn top_scores(&self, limit: usize) -> Result<Vec<TopScore>> {
        let state = self.read()?;
        Ok(state.top_scores.iter().take(limit).cloned().collect())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        kinds: &[InteractionKind],
        limit: usize,
    ) -> Result<Vec<ProfileInteraction>> {
        let state = self.read()?;
        let mut matching: Vec<&InteractionRecord> = state
            .interactions
            .iter()
            .rev()
            .filter(|r| r.actor_id.as_deref() == Some(user_id) && kinds.contains(&r.kind))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|r| ProfileInteraction {
                kind: r.kind,
                tag_ids: state
                    .items
                    .get(&r.item_id)
                    .map(|i| i.tags.iter().map(|t| t.id.clone()).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn viewed_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let state = self.read()?;
        Ok(state
            .interactions
            .iter()
            .filter(|r| {
                r.kind == InteractionKind::View
                    && r.actor_id.as_deref() == Some(user_id)
                    && r.created_at > since
            })
            .map(|r| r.item_id.clone())
            .collect())
    }

    async fn candidates(&self, query: &CandidateQuery<'_>) -> Result<Vec<ContentItem>> {
        let state = self.read()?;
        let mut pool: Vec<&ContentItem> = state
            .items
            .values()
            .filter(|i| i.status == ContentStatus::Approved && !query.exclude.contains(&i.id))
            .filter(|i| match query.any_tag_ids {
                Some(tag_ids) => i.tags.iter().any(|t| tag_ids.contains(&t.id)),
                None => true,
            })
            .collect();
        pool.sort_by(|a, b| by_score_then_id(a, b));
        Ok(pool.into_iter().take(query.limit).cloned().collect())
    }

    async fn filtered_items(
        &self,
        filter: &FeedFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let state = self.read()?;
        let mut rows: Vec<&ContentItem> = state
            .items
            .values()
            .filter(|i| i.status == ContentStatus::Approved && filter.matches(i))
            .collect();
        sort_filtered(&mut rows, filter.sort_key());
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let state = self.read()?;
        Ok(state.items.get(id).cloned())
    }

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        let state = self.read()?;
        Ok(state.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn viewer_state(&self, user_id: &str, item_ids: &[String]) -> Result<ViewerState> {
        let state = self.read()?;
        let mut viewer = ViewerState::default();
        for r in &state.interactions {
            if r.actor_id.as_deref() != Some(user_id) || !item_ids.contains(&r.item_id) {
                continue;
            }
            match r.kind {
                InteractionKind::Like => {
                    viewer.liked.insert(r.item_id.clone());
                }
                InteractionKind::Save => {
                    viewer.saved.insert(r.item_id.clone());
                }
                _ => {}
            }
        }
        Ok(viewer)
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<()> {
        let mut state = self.write()?;
        state.tags.insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<()> {
        let mut state = self.write()?;
        let mut stored = item.clone();
        stored.tags = item
            .tags
            .iter()
            .map(|t| state.tags.get(&t.id).cloned().unwrap_or_else(|| t.clone()))
            .collect();
        if let Some(existing) = state.items.get(&item.id) {
            stored.counters = existing.counters;
            stored.scores = existing.scores;
            stored.last_scored_at = existing.last_scored_at;
        }
        state.items.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn append_interaction(&self, record: &InteractionRecord) -> Result<()> {
        if record.kind.is_reversible() {
            bail!("{} interactions must go through toggle_interaction", record.kind);
        }
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(&record.item_id)
            .ok_or_else(|| anyhow!("item not found: {}", record.item_id))?;
        if record.kind == InteractionKind::View {
            item.counters.views += 1;
        }
        state.interactions.push(record.clone());
        Ok(())
    }

    async fn toggle_interaction(
        &self,
        actor_id: &str,
        item_id: &str,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        if !kind.is_reversible() {
            bail!("{} interactions cannot be toggled", kind);
        }
        let mut state = self.write()?;
        if !state.items.contains_key(item_id) {
            bail!("item not found: {}", item_id);
        }

        let existing = state.interactions.iter().position(|r| {
            r.kind == kind && r.item_id == item_id && r.actor_id.as_deref() == Some(actor_id)
        });
        let active = match existing {
            Some(idx) => {
                state.interactions.remove(idx);
                false
            }
            None => {
                state.interactions.push(InteractionRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    actor_id: Some(actor_id.to_string()),
                    item_id: item_id.to_string(),
                    kind,
                    meta: InteractionMeta::None,
                    created_at: at,
                });
                true
            }
        };

        let delta = if active { 1 } else { -1 };
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| anyhow!("item not found: {}", item_id))?;
        let counter = match kind {
            InteractionKind::Like => &mut item.counters.likes,
            _ => &mut item.counters.saves,
        };
        *counter = (*counter + delta).max(0);
        Ok(ToggleOutcome {
            active,
            count: *counter,
        })
    }

    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(&comment.item_id)
            .ok_or_else(|| anyhow!("item not found: {}", comment.item_id))?;
        item.counters.comments += 1;
        state.comments.push(comment.clone());
        state.interactions.push(InteractionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: Some(comment.author_id.clone()),
            item_id: comment.item_id.clone(),
            kind: InteractionKind::Comment,
            meta: InteractionMeta::Comment {
                comment_id: comment.id.clone(),
            },
            created_at: comment.created_at,
        });
        Ok(())
    }
}
