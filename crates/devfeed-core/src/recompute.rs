//! Batch score recomputation.
//!
//! Loads every approved item, aggregates its interaction counts, computes
//! the three score fields, and writes them back. Items are processed in
//! sequential batches; within a batch, up to `max_concurrency` items are
//! scored at once. A failure on one item is logged and counted, never
//! aborting the run. After all batches, the top-score snapshot is rebuilt.
//!
//! The job is idempotent: with unchanged inputs and the same `now`, a
//! second run writes identical values.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::models::{InteractionKind, ScoringTarget};
use crate::scoring::{self, EngagementCounts};
use crate::store::Store;

/// Job tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeParams {
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// A view counts as "long" at or above this dwell time. `0` counts
    /// every view.
    pub long_view_secs: u32,
    /// A comment counts as "long" above this many characters. `0` counts
    /// every comment.
    pub long_comment_chars: usize,
    pub top_snapshot_size: usize,
}

impl Default for RecomputeParams {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 25,
            long_view_secs: 120,
            long_comment_chars: 100,
            top_snapshot_size: 100,
        }
    }
}

/// Outcome of one recomputation run.
///
/// `success` is false only when the job itself could not run (the item
/// list failed to load). Per-item failures show up in `items_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub success: bool,
    pub error: Option<String>,
    pub items_total: usize,
    pub items_scored: usize,
    pub items_failed: usize,
    pub snapshot_refreshed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Gather the weighted-formula inputs for one item.
pub async fn aggregate_counts<S: Store + ?Sized>(
    store: &S,
    target: &ScoringTarget,
    params: &RecomputeParams,
) -> Result<EngagementCounts> {
    let id = target.id.as_str();
    let min_dwell = (params.long_view_secs > 0).then_some(params.long_view_secs);
    let min_chars = (params.long_comment_chars > 0).then_some(params.long_comment_chars);

    let (saves, likes, shares, demo_clicks, source_clicks, long_views, author_replies, long_comments) =
        futures::try_join!(
            store.count_interactions(id, InteractionKind::Save, None),
            store.count_interactions(id, InteractionKind::Like, None),
            store.count_interactions(id, InteractionKind::Share, None),
            store.count_interactions(id, InteractionKind::ClickDemo, None),
            store.count_interactions(id, InteractionKind::ClickSource, None),
            store.count_interactions(id, InteractionKind::View, min_dwell),
            store.count_author_replies(id, &target.owner_id),
            store.count_comments(id, min_chars),
        )?;

    Ok(EngagementCounts {
        saves,
        author_replies,
        demo_clicks,
        source_clicks,
        long_views,
        long_comments,
        follows: 0,
        shares,
        likes,
    })
}

async fn score_item<S: Store + ?Sized>(
    store: &S,
    target: &ScoringTarget,
    params: &RecomputeParams,
    now: DateTime<Utc>,
) -> Result<()> {
    let counts = aggregate_counts(store, target, params).await?;
    let scores = scoring::compute(&counts, target.submitted_at, now);
    store.write_scores(&target.id, &scores, now).await
}

/// Recompute scores for every approved item.
///
/// Never returns an error; job-level failures are reported through
/// [`JobReport::success`] and [`JobReport::error`].
pub async fn run_recompute<S: Store + ?Sized>(
    store: &S,
    params: &RecomputeParams,
    now: DateTime<Utc>,
) -> JobReport {
    let started_at = Utc::now();
    info!("score recomputation started");

    let targets = match store.scoring_targets().await {
        Ok(t) => t,
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "failed to load items for scoring");
            return JobReport {
                success: false,
                error: Some(message),
                items_total: 0,
                items_scored: 0,
                items_failed: 0,
                snapshot_refreshed: false,
                started_at,
                finished_at: Utc::now(),
            };
        }
    };

    let mut items_scored = 0;
    let mut items_failed = 0;
    let batch_size = params.batch_size.max(1);
    let concurrency = params.max_concurrency.max(1);

    for (batch_no, batch) in targets.chunks(batch_size).enumerate() {
        let results: Vec<(String, Result<()>)> = stream::iter(batch.to_vec())
            .map(|target| async move {
                let result = score_item(store, &target, params, now).await;
                (target.id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (item_id, result) in results {
            match result {
                Ok(()) => items_scored += 1,
                Err(e) => {
                    items_failed += 1;
                    warn!(
                        item_id = %item_id,
                        error = %format!("{:#}", e),
                        "failed to score item"
                    );
                }
            }
        }
        debug!(batch = batch_no + 1, size = batch.len(), "batch scored");
    }

    let snapshot_refreshed = match store.refresh_top_scores(params.top_snapshot_size).await {
        Ok(rows) => {
            debug!(rows, "top score snapshot refreshed");
            true
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "failed to refresh top score snapshot");
            false
        }
    };

    info!(
        items_total = targets.len(),
        items_scored, items_failed, "score recomputation finished"
    );

    JobReport {
        success: true,
        error: None,
        items_total: targets.len(),
        items_scored,
        items_failed,
        snapshot_refreshed,
        started_at,
        finished_at: Utc::now(),
    }
}
