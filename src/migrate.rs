//! Schema migrations. Every statement is idempotent, so `devfeed init` can
//! run any number of times.
//!
//! Timestamps are stored as Unix milliseconds (`INTEGER`).

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            project_type TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at INTEGER NOT NULL,
            view_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            save_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            engagement_score REAL NOT NULL DEFAULT 0,
            recency_factor REAL NOT NULL DEFAULT 0,
            final_score REAL NOT NULL DEFAULT 0,
            last_scored_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // position preserves attach order; position 0 is the primary tag
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_tags (
            item_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (item_id, tag_id),
            FOREIGN KEY (item_id) REFERENCES items(id),
            FOREIGN KEY (tag_id) REFERENCES tags(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interactions (
            id TEXT PRIMARY KEY,
            actor_id TEXT,
            item_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            dwell_secs INTEGER,
            referrer TEXT,
            comment_id TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            parent_id TEXT,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id),
            FOREIGN KEY (parent_id) REFERENCES comments(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS top_scores (
            rank INTEGER PRIMARY KEY,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            engagement_score REAL NOT NULL,
            final_score REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one like and one save per (actor, item).
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_interactions_toggle
            ON interactions(actor_id, item_id, kind)
            WHERE kind IN ('like', 'save')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_interactions_item_kind ON interactions(item_id, kind)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interactions_actor_time ON interactions(actor_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_item_tags_tag ON item_tags(tag_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_item ON comments(item_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_status_score ON items(status, final_score DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
