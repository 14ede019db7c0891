//! SQLite-backed [`Store`] implementation.
//!
//! Every mutation that touches both an interaction row and an item counter
//! runs in a single transaction. Dynamic `IN (...)` lists are built with
//! [`QueryBuilder`].

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use devfeed_core::feed::{FeedFilter, SortKey};
use devfeed_core::models::{
    Comment, ComputedScores, ContentItem, Counters, InteractionKind, InteractionMeta,
    InteractionRecord, ProfileInteraction, ScoringTarget, Tag, ToggleOutcome, TopScore,
    ViewerState,
};
use devfeed_core::store::{CandidateQuery, Store};

const ITEM_COLUMNS: &str = "i.id, i.owner_id, i.title, i.slug, i.project_type, i.status, \
    i.submitted_at, i.view_count, i.like_count, i.save_count, i.comment_count, \
    i.engagement_score, i.recency_factor, i.final_score, i.last_scored_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fill in `tags` (attach order) for a set of items.
    async fn attach_tags(&self, items: &mut [ContentItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let mut by_item = self.tags_for(&ids).await?;
        for item in items.iter_mut() {
            item.tags = by_item.remove(&item.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn tags_for(&self, item_ids: &[&str]) -> Result<HashMap<String, Vec<Tag>>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT it.item_id, t.id, t.name, t.category, t.slug \
             FROM item_tags it JOIN tags t ON t.id = it.tag_id WHERE it.item_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in item_ids {
            sep.push_bind(*id);
        }
        qb.push(") ORDER BY it.item_id, it.position");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out: HashMap<String, Vec<Tag>> = HashMap::new();
        for row in rows {
            let category: String = row.get("category");
            out.entry(row.get("item_id")).or_default().push(Tag {
                id: row.get("id"),
                name: row.get("name"),
                category: category.parse()?,
                slug: row.get("slug"),
            });
        }
        Ok(out)
    }

    async fn load_items(&self, mut qb: QueryBuilder<'_, Sqlite>) -> Result<Vec<ContentItem>> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut items = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;
        self.attach_tags(&mut items).await?;
        Ok(items)
    }
}

fn millis_to_dt(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let project_type: String = row.get("project_type");
    let status: String = row.get("status");
    let last_scored_at: Option<i64> = row.get("last_scored_at");
    Ok(ContentItem {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        slug: row.get("slug"),
        project_type: project_type.parse()?,
        status: status.parse()?,
        tags: Vec::new(),
        submitted_at: millis_to_dt(row.get("submitted_at"))?,
        counters: Counters {
            views: row.get("view_count"),
            likes: row.get("like_count"),
            saves: row.get("save_count"),
            comments: row.get("comment_count"),
        },
        scores: ComputedScores {
            engagement_score: row.get("engagement_score"),
            recency_factor: row.get("recency_factor"),
            final_score: row.get("final_score"),
        },
        last_scored_at: last_scored_at.map(millis_to_dt).transpose()?,
    })
}

fn counter_column(kind: InteractionKind) -> Result<&'static str> {
    match kind {
        InteractionKind::Like => Ok("like_count"),
        InteractionKind::Save => Ok("save_count"),
        other => bail!("{} interactions cannot be toggled", other),
    }
}

fn order_clause(key: SortKey) -> &'static str {
    match key {
        SortKey::Score => " ORDER BY i.final_score DESC, i.id ASC",
        SortKey::Newest => " ORDER BY i.submitted_at DESC, i.id ASC",
        SortKey::MostLiked => " ORDER BY i.like_count DESC, i.id ASC",
        SortKey::MostSaved => " ORDER BY i.save_count DESC, i.id ASC",
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn scoring_targets(&self) -> Result<Vec<ScoringTarget>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, submitted_at FROM items WHERE status = 'approved' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScoringTarget> {
                Ok(ScoringTarget {
                    id: row.get("id"),
                    owner_id: row.get("owner_id"),
                    submitted_at: millis_to_dt(row.get("submitted_at"))?,
                })
            })
            .collect()
    }

    async fn count_interactions(
        &self,
        item_id: &str,
        kind: InteractionKind,
        min_dwell_secs: Option<u32>,
    ) -> Result<u64> {
        let count: i64 = match min_dwell_secs {
            Some(min) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM interactions \
                     WHERE item_id = ? AND kind = ? AND COALESCE(dwell_secs, 0) >= ?",
                )
                .bind(item_id)
                .bind(kind.as_str())
                .bind(min as i64)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM interactions WHERE item_id = ? AND kind = ?")
                    .bind(item_id)
                    .bind(kind.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn count_author_replies(&self, item_id: &str, owner_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments \
             WHERE item_id = ? AND author_id = ? AND parent_id IS NOT NULL",
        )
        .bind(item_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn count_comments(&self, item_id: &str, min_chars: Option<usize>) -> Result<u64> {
        let count: i64 = match min_chars {
            Some(min) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM comments WHERE item_id = ? AND length(body) > ?",
                )
                .bind(item_id)
                .bind(min as i64)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE item_id = ?")
                    .bind(item_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn write_scores(
        &self,
        item_id: &str,
        scores: &ComputedScores,
        scored_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE items SET engagement_score = ?, recency_factor = ?, final_score = ?, \
             last_scored_at = ? WHERE id = ?",
        )
        .bind(scores.engagement_score)
        .bind(scores.recency_factor)
        .bind(scores.final_score)
        .bind(scored_at.timestamp_millis())
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("item not found: {}", item_id);
        }
        Ok(())
    }

    async fn refresh_top_scores(&self, limit: usize) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM top_scores")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO top_scores (rank, item_id, title, engagement_score, final_score)
            SELECT ROW_NUMBER() OVER (ORDER BY final_score DESC, id ASC),
                   id, title, engagement_score, final_score
            FROM items
            WHERE status = 'approved'
            ORDER BY final_score DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn top_scores(&self, limit: usize) -> Result<Vec<TopScore>> {
        let rows = sqlx::query(
            "SELECT rank, item_id, title, engagement_score, final_score \
             FROM top_scores ORDER BY rank LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TopScore {
                rank: row.get("rank"),
                item_id: row.get("item_id"),
                title: row.get("title"),
                engagement_score: row.get("engagement_score"),
                final_score: row.get("final_score"),
            })
            .collect())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        kinds: &[InteractionKind],
        limit: usize,
    ) -> Result<Vec<ProfileInteraction>> {
        if kinds.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT item_id, kind FROM interactions WHERE actor_id = ");
        qb.push_bind(user_id);
        qb.push(" AND kind IN (");
        let mut sep = qb.separated(", ");
        for kind in kinds {
            sep.push_bind(kind.as_str());
        }
        qb.push(") ORDER BY created_at DESC, rowid DESC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let recent: Vec<(String, InteractionKind)> = rows
            .iter()
            .map(|row| -> Result<(String, InteractionKind)> {
                let kind: String = row.get("kind");
                Ok((row.get("item_id"), kind.parse()?))
            })
            .collect::<Result<_>>()?;

        if recent.is_empty() {
            return Ok(Vec::new());
        }

        let unique: HashSet<&str> = recent.iter().map(|(id, _)| id.as_str()).collect();
        let unique: Vec<&str> = unique.into_iter().collect();
        let tags = self.tags_for(&unique).await?;

        Ok(recent
            .iter()
            .map(|(item_id, kind)| ProfileInteraction {
                kind: *kind,
                tag_ids: tags
                    .get(item_id)
                    .map(|ts| ts.iter().map(|t| t.id.clone()).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn viewed_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT item_id FROM interactions \
             WHERE actor_id = ? AND kind = 'view' AND created_at > ?",
        )
        .bind(user_id)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn candidates(&self, query: &CandidateQuery<'_>) -> Result<Vec<ContentItem>> {
        if matches!(query.any_tag_ids, Some(ids) if ids.is_empty()) || query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM items i WHERE i.status = 'approved'",
            ITEM_COLUMNS
        ));

        if !query.exclude.is_empty() {
            qb.push(" AND i.id NOT IN (");
            let mut sep = qb.separated(", ");
            for id in query.exclude {
                sep.push_bind(id.as_str());
            }
            qb.push(")");
        }

        if let Some(tag_ids) = query.any_tag_ids {
            qb.push(
                " AND EXISTS (SELECT 1 FROM item_tags it WHERE it.item_id = i.id AND it.tag_id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in tag_ids {
                sep.push_bind(id.as_str());
            }
            qb.push("))");
        }

        qb.push(order_clause(SortKey::Score));
        qb.push(" LIMIT ");
        qb.push_bind(query.limit as i64);

        self.load_items(qb).await
    }

    async fn filtered_items(
        &self,
        filter: &FeedFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM items i WHERE i.status = 'approved'",
            ITEM_COLUMNS
        ));

        if let Some(pt) = filter.project_type {
            qb.push(" AND i.project_type = ");
            qb.push_bind(pt.as_str());
        }

        for slug in &filter.tags {
            qb.push(
                " AND EXISTS (SELECT 1 FROM item_tags it JOIN tags t ON t.id = it.tag_id \
                 WHERE it.item_id = i.id AND t.slug = ",
            );
            qb.push_bind(slug.as_str());
            qb.push(")");
        }

        qb.push(order_clause(filter.sort_key()));
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);

        self.load_items(qb).await
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM items i WHERE i.id = ", ITEM_COLUMNS));
        qb.push_bind(id);
        Ok(self.load_items(qb).await?.into_iter().next())
    }

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        let row = sqlx::query(
            "SELECT id, item_id, author_id, parent_id, body, created_at FROM comments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Comment> {
            Ok(Comment {
                id: row.get("id"),
                item_id: row.get("item_id"),
                author_id: row.get("author_id"),
                parent_id: row.get("parent_id"),
                body: row.get("body"),
                created_at: millis_to_dt(row.get("created_at"))?,
            })
        })
        .transpose()
    }

    async fn viewer_state(&self, user_id: &str, item_ids: &[String]) -> Result<ViewerState> {
        let mut state = ViewerState::default();
        if item_ids.is_empty() {
            return Ok(state);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT item_id, kind FROM interactions \
             WHERE kind IN ('like', 'save') AND actor_id = ",
        );
        qb.push_bind(user_id);
        qb.push(" AND item_id IN (");
        let mut sep = qb.separated(", ");
        for id in item_ids {
            sep.push_bind(id.as_str());
        }
        qb.push(")");

        for row in qb.build().fetch_all(&self.pool).await? {
            let item_id: String = row.get("item_id");
            let kind: String = row.get("kind");
            match kind.as_str() {
                "like" => {
                    state.liked.insert(item_id);
                }
                "save" => {
                    state.saved.insert(item_id);
                }
                _ => {}
            }
        }
        Ok(state)
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tags (id, name, category, slug)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                slug = excluded.slug
            "#,
        )
        .bind(&tag.id)
        .bind(&tag.name)
        .bind(tag.category.as_str())
        .bind(&tag.slug)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO items (id, owner_id, title, slug, project_type, status, submitted_at,
                               view_count, like_count, save_count, comment_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                slug = excluded.slug,
                project_type = excluded.project_type,
                status = excluded.status,
                submitted_at = excluded.submitted_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.owner_id)
        .bind(&item.title)
        .bind(&item.slug)
        .bind(item.project_type.as_str())
        .bind(item.status.as_str())
        .bind(item.submitted_at.timestamp_millis())
        .bind(item.counters.views)
        .bind(item.counters.likes)
        .bind(item.counters.saves)
        .bind(item.counters.comments)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM item_tags WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        for (position, tag) in item.tags.iter().enumerate() {
            sqlx::query(
                "INSERT INTO tags (id, name, category, slug) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&tag.id)
            .bind(&tag.name)
            .bind(tag.category.as_str())
            .bind(&tag.slug)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO item_tags (item_id, tag_id, position) VALUES (?, ?, ?)")
                .bind(&item.id)
                .bind(&tag.id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_interaction(&self, record: &InteractionRecord) -> Result<()> {
        if record.kind.is_reversible() {
            bail!("{} interactions must go through toggle_interaction", record.kind);
        }

        let (dwell_secs, referrer, comment_id) = match &record.meta {
            InteractionMeta::View {
                dwell_secs,
                referrer,
            } => (Some(*dwell_secs as i64), referrer.clone(), None),
            InteractionMeta::Comment { comment_id } => (None, None, Some(comment_id.clone())),
            InteractionMeta::None => (None, None, None),
        };

        // Mutating transactions open with a write: under WAL a read-first
        // transaction gets SQLITE_BUSY on upgrade without honoring
        // `busy_timeout`.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO interactions (id, actor_id, item_id, kind, dwell_secs, referrer, \
             comment_id, created_at) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM items WHERE id = ?)",
        )
        .bind(&record.id)
        .bind(&record.actor_id)
        .bind(&record.item_id)
        .bind(record.kind.as_str())
        .bind(dwell_secs)
        .bind(referrer)
        .bind(comment_id)
        .bind(record.created_at.timestamp_millis())
        .bind(&record.item_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            bail!("item not found: {}", record.item_id);
        }

        if record.kind == InteractionKind::View {
            sqlx::query("UPDATE items SET view_count = view_count + 1 WHERE id = ?")
                .bind(&record.item_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn toggle_interaction(
        &self,
        actor_id: &str,
        item_id: &str,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        let column = counter_column(kind)?;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM interactions WHERE actor_id = ? AND item_id = ? AND kind = ?",
        )
        .bind(actor_id)
        .bind(item_id)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let active = removed == 0;

        let adjust = if active {
            format!("{col} = {col} + 1", col = column)
        } else {
            format!("{col} = MAX({col} - 1, 0)", col = column)
        };
        let count: Option<i64> = sqlx::query_scalar(&format!(
            "UPDATE items SET {} WHERE id = ? RETURNING {}",
            adjust, column
        ))
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(count) = count else {
            bail!("item not found: {}", item_id);
        };

        if active {
            sqlx::query(
                "INSERT INTO interactions (id, actor_id, item_id, kind, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(actor_id)
            .bind(item_id)
            .bind(kind.as_str())
            .bind(at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ToggleOutcome { active, count })
    }

    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE items SET comment_count = comment_count + 1 WHERE id = ?")
            .bind(&comment.item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if touched == 0 {
            bail!("item not found: {}", comment.item_id);
        }

        sqlx::query(
            "INSERT INTO comments (id, item_id, author_id, parent_id, body, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&comment.id)
        .bind(&comment.item_id)
        .bind(&comment.author_id)
        .bind(&comment.parent_id)
        .bind(&comment.body)
        .bind(comment.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO interactions (id, actor_id, item_id, kind, comment_id, created_at) \
             VALUES (?, ?, ?, 'comment', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&comment.author_id)
        .bind(&comment.item_id)
        .bind(&comment.id)
        .bind(comment.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
