//! SQLite store and service tests against a real database file.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use devfeed::config::Config;
use devfeed::db;
use devfeed::migrate;
use devfeed::service::{FeedService, ServiceSettings};
use devfeed::sqlite_store::SqliteStore;
use devfeed_core::cache::{Cache, Entity};
use devfeed_core::feed::{FeedFilter, FeedRequest, FeedStrategy, SortKey};
use devfeed_core::models::{
    ComputedScores, ContentItem, ContentStatus, Counters, InteractionKind, InteractionMeta,
    InteractionRecord, ProjectType, Tag, TagCategory,
};
use devfeed_core::recompute::{run_recompute, RecomputeParams};
use devfeed_core::store::Store;

async fn setup() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_db_path(tmp.path().join("data").join("devfeed.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn tag(slug: &str, category: TagCategory) -> Tag {
    Tag {
        id: format!("t-{}", slug),
        name: slug.to_string(),
        category,
        slug: slug.to_string(),
    }
}

fn item(id: &str, tags: Vec<Tag>, project_type: ProjectType, days_old: i64) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        owner_id: format!("owner-{}", id),
        title: format!("Project {}", id),
        slug: id.to_string(),
        project_type,
        status: ContentStatus::Approved,
        tags,
        submitted_at: Utc::now() - Duration::days(days_old),
        counters: Counters::default(),
        scores: ComputedScores::default(),
        last_scored_at: None,
    }
}

async fn seed(store: &SqliteStore) {
    let rust = tag("rust", TagCategory::Language);
    let react = tag("react", TagCategory::Frontend);
    let cli = tag("cli", TagCategory::Backend);
    for t in [&rust, &react, &cli] {
        store.upsert_tag(t).await.unwrap();
    }

    let items = [
        item("r1", vec![rust.clone(), cli.clone()], ProjectType::CliTool, 1),
        item("r2", vec![rust.clone()], ProjectType::Library, 2),
        item("j1", vec![react.clone()], ProjectType::WebApp, 1),
        item("j2", vec![react.clone(), rust.clone()], ProjectType::WebApp, 3),
    ];
    for it in &items {
        store.upsert_item(it).await.unwrap();
    }

    let finals = [("r1", 10.0), ("r2", 8.0), ("j1", 12.0), ("j2", 11.0)];
    for (id, final_score) in finals {
        store
            .write_scores(
                id,
                &ComputedScores {
                    engagement_score: final_score,
                    recency_factor: 1.0,
                    final_score,
                },
                Utc::now(),
            )
            .await
            .unwrap();
    }
}

fn request(user: Option<&str>, filter: Option<FeedFilter>) -> FeedRequest {
    FeedRequest {
        user_id: user.map(str::to_string),
        page: 1,
        page_size: 10,
        filter,
    }
}

fn ids(page: &devfeed_core::feed::FeedPage) -> Vec<&str> {
    page.items.iter().map(|e| e.item.id.as_str()).collect()
}

#[tokio::test]
async fn test_tags_keep_attach_order() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let j2 = store.get_item("j2").await.unwrap().unwrap();
    let slugs: Vec<&str> = j2.tags.iter().map(|t| t.slug.as_str()).collect();
    assert_eq!(slugs, vec!["react", "rust"]);
}

#[tokio::test]
async fn test_toggle_keeps_counter_in_step_with_records() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    let now = Utc::now();

    let a = store
        .toggle_interaction("u1", "r1", InteractionKind::Like, now)
        .await
        .unwrap();
    let b = store
        .toggle_interaction("u2", "r1", InteractionKind::Like, now)
        .await
        .unwrap();
    let c = store
        .toggle_interaction("u1", "r1", InteractionKind::Like, now)
        .await
        .unwrap();
    assert!(a.active && b.active && !c.active);
    assert_eq!((a.count, b.count, c.count), (1, 2, 1));

    let records = store
        .count_interactions("r1", InteractionKind::Like, None)
        .await
        .unwrap();
    let stored = store.get_item("r1").await.unwrap().unwrap();
    assert_eq!(records, 1);
    assert_eq!(stored.counters.likes, 1);

    let err = store
        .toggle_interaction("u1", "r1", InteractionKind::View, now)
        .await;
    assert!(err.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_wait_for_the_lock() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let actor = format!("u{}", i % 8);
            if i % 5 == 0 {
                store
                    .append_interaction(&InteractionRecord {
                        id: format!("v{}", i),
                        actor_id: Some(actor),
                        item_id: "r1".into(),
                        kind: InteractionKind::View,
                        meta: InteractionMeta::View {
                            dwell_secs: 10,
                            referrer: None,
                        },
                        created_at: Utc::now(),
                    })
                    .await
                    .map(|_| ())
            } else {
                store
                    .toggle_interaction(&actor, "r1", InteractionKind::Like, Utc::now())
                    .await
                    .map(|_| ())
            }
        }));
    }

    let mut errors = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            errors.push(format!("{:#}", e));
        }
    }
    assert!(errors.is_empty(), "writes failed: {:?}", errors);

    let likes = store
        .count_interactions("r1", InteractionKind::Like, None)
        .await
        .unwrap();
    let views = store
        .count_interactions("r1", InteractionKind::View, None)
        .await
        .unwrap();
    let stored = store.get_item("r1").await.unwrap().unwrap();
    assert_eq!(stored.counters.likes, likes as i64);
    assert_eq!(stored.counters.views, views as i64);
    assert_eq!(views, 8);
}

#[tokio::test]
async fn test_writes_against_missing_item_fail() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let toggle = store
        .toggle_interaction("u1", "ghost", InteractionKind::Save, Utc::now())
        .await;
    assert!(toggle.unwrap_err().to_string().contains("item not found"));

    let share = store
        .append_interaction(&InteractionRecord {
            id: "s1".into(),
            actor_id: None,
            item_id: "ghost".into(),
            kind: InteractionKind::Share,
            meta: InteractionMeta::None,
            created_at: Utc::now(),
        })
        .await;
    assert!(share.unwrap_err().to_string().contains("item not found"));
    assert_eq!(
        store
            .count_interactions("ghost", InteractionKind::Save, None)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_upsert_leaves_counters_to_interactions() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    store
        .toggle_interaction("u1", "r2", InteractionKind::Like, Utc::now())
        .await
        .unwrap();

    let mut renamed = store.get_item("r2").await.unwrap().unwrap();
    renamed.title = "Renamed".into();
    renamed.counters = Counters::default();
    store.upsert_item(&renamed).await.unwrap();

    let stored = store.get_item("r2").await.unwrap().unwrap();
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.counters.likes, 1);
    assert_eq!(stored.scores.final_score, 8.0);

    let off = store
        .toggle_interaction("u1", "r2", InteractionKind::Like, Utc::now())
        .await
        .unwrap();
    assert!(!off.active);
    assert_eq!(off.count, 0);
}

#[tokio::test]
async fn test_recompute_is_idempotent_and_builds_snapshot() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

    // r2: two saves and one long view.
    for actor in ["u1", "u2"] {
        store
            .toggle_interaction(actor, "r2", InteractionKind::Save, now)
            .await
            .unwrap();
    }
    store
        .append_interaction(&InteractionRecord {
            id: "v1".into(),
            actor_id: Some("u3".into()),
            item_id: "r2".into(),
            kind: InteractionKind::View,
            meta: InteractionMeta::View {
                dwell_secs: 300,
                referrer: None,
            },
            created_at: now,
        })
        .await
        .unwrap();

    let params = RecomputeParams::default();
    let first = run_recompute(store.as_ref(), &params, now).await;
    assert!(first.success);
    assert_eq!(first.items_total, 4);
    assert_eq!(first.items_scored, 4);
    assert!(first.snapshot_refreshed);

    let after_first = store.get_item("r2").await.unwrap().unwrap();
    assert_eq!(after_first.scores.engagement_score, 120.0);
    assert_eq!(after_first.last_scored_at, Some(now));

    let second = run_recompute(store.as_ref(), &params, now).await;
    assert!(second.success);
    let after_second = store.get_item("r2").await.unwrap().unwrap();
    assert_eq!(after_first.scores, after_second.scores);

    let top = store.top_scores(10).await.unwrap();
    assert_eq!(top.len(), 4);
    assert_eq!(top[0].item_id, "r2");
    let ranks: Vec<i64> = top.iter().map(|t| t.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_generic_feed_orders_by_final_score() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let page = devfeed_core::feed::get_feed(
        store.as_ref(),
        &request(None, None),
        &Default::default(),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(page.strategy, FeedStrategy::Generic);
    assert_eq!(ids(&page), vec!["j1", "j2", "r1", "r2"]);
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_personalized_feed_boosts_interests_and_skips_viewed() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    let now = Utc::now();

    store
        .toggle_interaction("u9", "r2", InteractionKind::Save, now - Duration::hours(2))
        .await
        .unwrap();
    store
        .append_interaction(&InteractionRecord {
            id: "v-u9-r2".into(),
            actor_id: Some("u9".into()),
            item_id: "r2".into(),
            kind: InteractionKind::View,
            meta: InteractionMeta::View {
                dwell_secs: 10,
                referrer: None,
            },
            created_at: now - Duration::hours(1),
        })
        .await
        .unwrap();

    let page = devfeed_core::feed::get_feed(
        store.as_ref(),
        &request(Some("u9"), None),
        &Default::default(),
        now,
    )
    .await
    .unwrap();

    assert_eq!(page.strategy, FeedStrategy::Personalized);
    // r2 was saved and then viewed within the exclusion window.
    assert!(!ids(&page).contains(&"r2"));
    // Rust interest doubles r1 (10 -> 20) and j2 (11 -> 22); j1 has none.
    assert_eq!(ids(&page), vec!["j2", "r1", "j1"]);
    let scores: Vec<f64> = page
        .items
        .iter()
        .map(|e| e.personalized_score.unwrap())
        .collect();
    assert_eq!(scores, vec![22.0, 20.0, 12.0]);
}

#[tokio::test]
async fn test_filtered_feed_requires_all_tags() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let filter = FeedFilter {
        tags: vec!["rust".into()],
        project_type: None,
        sort: Some(SortKey::Newest),
    };
    let page = devfeed_core::feed::get_feed(
        store.as_ref(),
        &request(Some("u1"), Some(filter)),
        &Default::default(),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(page.strategy, FeedStrategy::Filtered);
    assert_eq!(ids(&page), vec!["r1", "r2", "j2"]);

    let filter = FeedFilter {
        tags: vec!["rust".into(), "react".into()],
        project_type: Some(ProjectType::WebApp),
        sort: None,
    };
    let page = devfeed_core::feed::get_feed(
        store.as_ref(),
        &request(None, Some(filter)),
        &Default::default(),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(ids(&page), vec!["j2"]);
}

#[tokio::test]
async fn test_filtered_feed_pagination_reports_more() {
    let (_tmp, store) = setup().await;
    seed(&store).await;

    let mut req = request(
        None,
        Some(FeedFilter {
            tags: vec!["rust".into()],
            ..Default::default()
        }),
    );
    req.page_size = 2;
    let first = devfeed_core::feed::get_feed(store.as_ref(), &req, &Default::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["j2", "r1"]);
    assert!(first.has_more);

    req.page = 2;
    let second =
        devfeed_core::feed::get_feed(store.as_ref(), &req, &Default::default(), Utc::now())
            .await
            .unwrap();
    assert_eq!(ids(&second), vec!["r2"]);
    assert!(!second.has_more);
}

#[tokio::test]
async fn test_service_invalidation_refreshes_personal_feed() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    let service = FeedService::new(store.clone(), Cache::in_memory(), ServiceSettings::default());
    let now = Utc::now();

    service.toggle_save("u5", "r2", now).await.unwrap();
    let before = service.get_feed(&request(Some("u5"), None), now).await.unwrap();
    assert_eq!(before.strategy, FeedStrategy::Personalized);
    assert!(before.items.iter().any(|e| e.item.id == "r2" && e.has_saved));

    // A view by u5 excludes r2, but only after the cached page is dropped.
    store
        .append_interaction(&InteractionRecord {
            id: "v-u5".into(),
            actor_id: Some("u5".into()),
            item_id: "r2".into(),
            kind: InteractionKind::View,
            meta: InteractionMeta::View {
                dwell_secs: 5,
                referrer: None,
            },
            created_at: now,
        })
        .await
        .unwrap();
    let cached = service.get_feed(&request(Some("u5"), None), now).await.unwrap();
    assert!(cached.items.iter().any(|e| e.item.id == "r2"));

    let dropped = service.invalidate(&[Entity::User("u5".into())]).await;
    assert!(dropped >= 1);
    let fresh = service.get_feed(&request(Some("u5"), None), now).await.unwrap();
    assert!(!fresh.items.iter().any(|e| e.item.id == "r2"));
}

#[tokio::test]
async fn test_comment_threading_persists() {
    let (_tmp, store) = setup().await;
    seed(&store).await;
    let service = FeedService::new(store.clone(), Cache::in_memory(), ServiceSettings::default());
    let now = Utc::now();

    let top = service
        .add_comment("u1", "r1", "How did you handle config reloads?", None, now)
        .await
        .unwrap();
    service
        .add_comment("owner-r1", "r1", "With a file watcher.", Some(&top.id), now)
        .await
        .unwrap();

    assert_eq!(store.count_author_replies("r1", "owner-r1").await.unwrap(), 1);
    assert_eq!(store.count_comments("r1", None).await.unwrap(), 2);
    assert_eq!(store.count_comments("r1", Some(25)).await.unwrap(), 1);
    assert_eq!(
        store
            .count_interactions("r1", InteractionKind::Comment, None)
            .await
            .unwrap(),
        2
    );
    let stored = store.get_item("r1").await.unwrap().unwrap();
    assert_eq!(stored.counters.comments, 2);
}
