//! Engagement scoring: weighted interaction counts, recency decay, and the
//! final sortable score.
//!
//! Everything here is pure and deterministic. The caller supplies `now` so
//! that recomputation runs are reproducible.
//!
//! ```text
//! engagement = Σ count_i × weight_i
//! recency    = exp(-Δdays / 30)
//! final      = engagement × recency
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ComputedScores;

pub const WEIGHT_SAVES: f64 = 50.0;
pub const WEIGHT_AUTHOR_REPLIES: f64 = 40.0;
pub const WEIGHT_DEMO_CLICKS: f64 = 25.0;
pub const WEIGHT_SOURCE_CLICKS: f64 = 25.0;
pub const WEIGHT_LONG_VIEWS: f64 = 20.0;
pub const WEIGHT_LONG_COMMENTS: f64 = 15.0;
/// Reserved; follows do not contribute yet.
pub const WEIGHT_FOLLOWS: f64 = 0.0;
pub const WEIGHT_SHARES: f64 = 5.0;
pub const WEIGHT_LIKES: f64 = 1.0;

/// Decay constant in days. One constant ≈ 63% loss.
pub const RECENCY_DECAY_DAYS: f64 = 30.0;

const SECS_PER_DAY: f64 = 86_400.0;

/// Aggregated per-type counts for one content item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub saves: u64,
    pub author_replies: u64,
    pub demo_clicks: u64,
    pub source_clicks: u64,
    pub long_views: u64,
    pub long_comments: u64,
    pub follows: u64,
    pub shares: u64,
    pub likes: u64,
}

/// Weighted sum of interaction counts.
pub fn engagement_score(counts: &EngagementCounts) -> f64 {
    counts.saves as f64 * WEIGHT_SAVES
        + counts.author_replies as f64 * WEIGHT_AUTHOR_REPLIES
        + counts.demo_clicks as f64 * WEIGHT_DEMO_CLICKS
        + counts.source_clicks as f64 * WEIGHT_SOURCE_CLICKS
        + counts.long_views as f64 * WEIGHT_LONG_VIEWS
        + counts.long_comments as f64 * WEIGHT_LONG_COMMENTS
        + counts.follows as f64 * WEIGHT_FOLLOWS
        + counts.shares as f64 * WEIGHT_SHARES
        + counts.likes as f64 * WEIGHT_LIKES
}

/// Exponential decay multiplier based on content age.
///
/// Returns `1.0` at submission time and decreases strictly afterwards.
/// Submission timestamps in the future are treated as age zero.
pub fn recency_factor(submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - submitted_at).num_milliseconds().max(0) as f64;
    let days = elapsed_ms / 1000.0 / SECS_PER_DAY;
    (-days / RECENCY_DECAY_DAYS).exp()
}

pub fn final_score(engagement: f64, recency: f64) -> f64 {
    engagement * recency
}

/// Compute all three score fields for an item.
pub fn compute(
    counts: &EngagementCounts,
    submitted_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ComputedScores {
    let engagement = engagement_score(counts);
    let recency = recency_factor(submitted_at, now);
    ComputedScores {
        engagement_score: engagement,
        recency_factor: recency,
        final_score: final_score(engagement, recency),
    }
}
