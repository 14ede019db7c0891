//! Interaction ingestion: likes, saves, views, shares, clicks, comments.
//!
//! Each handler checks that the item exists, applies the mutation through
//! the store (record and counter together), and drops cache entries derived
//! from the touched entities.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use devfeed_core::cache::Entity;
use devfeed_core::models::{
    Comment, InteractionKind, InteractionMeta, InteractionRecord, ToggleOutcome,
};
use devfeed_core::{FeedError, FeedResult};

use crate::service::FeedService;

/// A signed-in viewer's repeat view inside this window is not recorded.
pub const VIEW_DEDUP_WINDOW_MINUTES: i64 = 5;

pub const MAX_COMMENT_CHARS: usize = 5000;

/// Outcome of a view ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOutcome {
    pub recorded: bool,
}

impl FeedService {
    pub async fn toggle_like(
        &self,
        actor_id: &str,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> FeedResult<ToggleOutcome> {
        self.toggle(actor_id, item_id, InteractionKind::Like, now).await
    }

    pub async fn toggle_save(
        &self,
        actor_id: &str,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> FeedResult<ToggleOutcome> {
        self.toggle(actor_id, item_id, InteractionKind::Save, now).await
    }

    async fn toggle(
        &self,
        actor_id: &str,
        item_id: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> FeedResult<ToggleOutcome> {
        require_actor(actor_id)?;
        self.require_item(item_id).await?;

        let outcome = self
            .store
            .toggle_interaction(actor_id, item_id, kind, now)
            .await?;
        debug!(item_id, actor_id, %kind, active = outcome.active, "toggled");

        self.invalidate(&[
            Entity::Item(item_id.to_string()),
            Entity::User(actor_id.to_string()),
        ])
        .await;
        Ok(outcome)
    }

    /// Record a view. A signed-in viewer's repeat view of the same item
    /// within [`VIEW_DEDUP_WINDOW_MINUTES`] is skipped.
    pub async fn record_view(
        &self,
        actor_id: Option<&str>,
        item_id: &str,
        dwell_secs: u32,
        referrer: Option<String>,
        now: DateTime<Utc>,
    ) -> FeedResult<ViewOutcome> {
        self.require_item(item_id).await?;

        if let Some(actor) = actor_id {
            let since = now - Duration::minutes(VIEW_DEDUP_WINDOW_MINUTES);
            let recent = self.store.viewed_since(actor, since).await?;
            if recent.contains(item_id) {
                debug!(item_id, actor, "duplicate view skipped");
                return Ok(ViewOutcome { recorded: false });
            }
        }

        let record = InteractionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.map(str::to_string),
            item_id: item_id.to_string(),
            kind: InteractionKind::View,
            meta: InteractionMeta::View {
                dwell_secs,
                referrer,
            },
            created_at: now,
        };
        self.store.append_interaction(&record).await?;

        if let Some(actor) = actor_id {
            self.invalidate(&[Entity::User(actor.to_string())]).await;
        }
        Ok(ViewOutcome { recorded: true })
    }

    /// Record a share or a demo/source click.
    pub async fn record_interaction(
        &self,
        actor_id: Option<&str>,
        item_id: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> FeedResult<()> {
        if !matches!(
            kind,
            InteractionKind::Share | InteractionKind::ClickDemo | InteractionKind::ClickSource
        ) {
            return Err(FeedError::InvalidRequest(format!(
                "kind must be share, click_demo, or click_source (got {})",
                kind
            )));
        }
        self.require_item(item_id).await?;

        self.store
            .append_interaction(&InteractionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                actor_id: actor_id.map(str::to_string),
                item_id: item_id.to_string(),
                kind,
                meta: InteractionMeta::None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Add a comment or a one-level reply.
    pub async fn add_comment(
        &self,
        author_id: &str,
        item_id: &str,
        body: &str,
        parent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> FeedResult<Comment> {
        require_actor(author_id)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(FeedError::InvalidRequest("comment body must not be empty".into()));
        }
        if body.chars().count() > MAX_COMMENT_CHARS {
            return Err(FeedError::InvalidRequest(format!(
                "comment body must be at most {} characters",
                MAX_COMMENT_CHARS
            )));
        }

        self.require_item(item_id).await?;

        if let Some(parent_id) = parent_id {
            let parent = self
                .store
                .get_comment(parent_id)
                .await?
                .ok_or_else(|| FeedError::NotFound(format!("comment {}", parent_id)))?;
            if parent.item_id != item_id {
                return Err(FeedError::InvalidRequest(
                    "parent comment belongs to another item".into(),
                ));
            }
            if parent.parent_id.is_some() {
                return Err(FeedError::InvalidRequest(
                    "replies are limited to one level".into(),
                ));
            }
        }

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            author_id: author_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            body: body.to_string(),
            created_at: now,
        };
        self.store.add_comment(&comment).await?;

        self.invalidate(&[Entity::Item(item_id.to_string())]).await;
        Ok(comment)
    }
}

fn require_actor(actor_id: &str) -> FeedResult<()> {
    if actor_id.trim().is_empty() {
        return Err(FeedError::InvalidRequest("actor must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use devfeed_core::cache::Cache;
    use devfeed_core::models::{
        ComputedScores, ContentItem, ContentStatus, Counters, ProjectType,
    };
    use devfeed_core::store::memory::InMemoryStore;
    use devfeed_core::store::Store;

    use crate::service::ServiceSettings;

    async fn service() -> (FeedService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_item(&ContentItem {
                id: "p1".into(),
                owner_id: "owner".into(),
                title: "Project".into(),
                slug: "project".into(),
                project_type: ProjectType::Game,
                status: ContentStatus::Approved,
                tags: Vec::new(),
                submitted_at: Utc::now(),
                counters: Counters::default(),
                scores: ComputedScores::default(),
                last_scored_at: None,
            })
            .await
            .unwrap();
        let service = FeedService::new(
            store.clone(),
            Cache::in_memory(),
            ServiceSettings::default(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_like_toggle_alternates_count() {
        let (service, _) = service().await;
        let now = Utc::now();
        let mut counts = Vec::new();
        for _ in 0..4 {
            counts.push(service.toggle_like("u1", "p1", now).await.unwrap().count);
        }
        assert_eq!(counts, vec![1, 0, 1, 0]);
    }

    #[tokio::test]
    async fn test_toggle_unknown_item_is_not_found() {
        let (service, _) = service().await;
        let err = service
            .toggle_save("u1", "nope", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_toggle_invalidates_score_cache() {
        let (service, store) = service().await;
        assert_eq!(service.get_score("p1").await.unwrap().unwrap().final_score, 0.0);

        store
            .write_scores(
                "p1",
                &ComputedScores {
                    engagement_score: 50.0,
                    recency_factor: 1.0,
                    final_score: 50.0,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        // Still cached.
        assert_eq!(service.get_score("p1").await.unwrap().unwrap().final_score, 0.0);

        service.toggle_save("u1", "p1", Utc::now()).await.unwrap();
        assert_eq!(service.get_score("p1").await.unwrap().unwrap().final_score, 50.0);
    }

    #[tokio::test]
    async fn test_repeat_view_within_window_is_skipped() {
        let (service, store) = service().await;
        let t0 = Utc::now();

        let first = service
            .record_view(Some("u1"), "p1", 30, None, t0)
            .await
            .unwrap();
        assert!(first.recorded);

        let repeat = service
            .record_view(Some("u1"), "p1", 30, None, t0 + Duration::minutes(2))
            .await
            .unwrap();
        assert!(!repeat.recorded);

        let later = service
            .record_view(Some("u1"), "p1", 30, None, t0 + Duration::minutes(6))
            .await
            .unwrap();
        assert!(later.recorded);

        // Anonymous views are never deduplicated.
        for _ in 0..2 {
            assert!(service
                .record_view(None, "p1", 0, Some("https://example.com".into()), t0)
                .await
                .unwrap()
                .recorded);
        }
        assert_eq!(store.get_item("p1").await.unwrap().unwrap().counters.views, 4);
    }

    #[tokio::test]
    async fn test_record_interaction_rejects_reversible_kinds() {
        let (service, store) = service().await;
        let err = service
            .record_interaction(None, "p1", InteractionKind::Like, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidRequest(_)));

        service
            .record_interaction(Some("u1"), "p1", InteractionKind::ClickDemo, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store
                .count_interactions("p1", InteractionKind::ClickDemo, None)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_comment_threading_limited_to_one_level() {
        let (service, store) = service().await;
        let now = Utc::now();
        let top = service
            .add_comment("u1", "p1", "Great project", None, now)
            .await
            .unwrap();
        let reply = service
            .add_comment("owner", "p1", "Thanks!", Some(&top.id), now)
            .await
            .unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some(top.id.as_str()));

        let err = service
            .add_comment("u2", "p1", "Nested", Some(&reply.id), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidRequest(_)));

        assert_eq!(store.get_item("p1").await.unwrap().unwrap().counters.comments, 2);
        assert_eq!(store.count_author_replies("p1", "owner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_comment_rejected() {
        let (service, _) = service().await;
        let err = service
            .add_comment("u1", "p1", "   ", None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidRequest(_)));
    }
}
