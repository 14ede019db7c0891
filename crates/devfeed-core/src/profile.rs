//! Interest profiles: per-user tag affinity derived from recent history.
//!
//! Each of the user's most recent save/like/view interactions adds a fixed
//! weight to every tag on the item it touched. Saves count most, then
//! views, then likes. The profile is computed per request and never
//! persisted.

use std::collections::HashMap;

use tracing::debug;

use crate::error::FeedResult;
use crate::models::{InteractionKind, InterestTag, ProfileInteraction};
use crate::store::Store;

pub const WEIGHT_SAVE: f64 = 5.0;
pub const WEIGHT_VIEW: f64 = 2.0;
pub const WEIGHT_LIKE: f64 = 1.0;

/// Interaction kinds that contribute to a profile.
pub const PROFILE_KINDS: [InteractionKind; 3] = [
    InteractionKind::Save,
    InteractionKind::Like,
    InteractionKind::View,
];

/// Window and output size for profile construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileParams {
    /// How many recent interactions to read.
    pub window: usize,
    /// How many tags to keep.
    pub top_k: usize,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            window: 100,
            top_k: 20,
        }
    }
}

pub fn interaction_weight(kind: InteractionKind) -> f64 {
    match kind {
        InteractionKind::Save => WEIGHT_SAVE,
        InteractionKind::View => WEIGHT_VIEW,
        InteractionKind::Like => WEIGHT_LIKE,
        _ => 0.0,
    }
}

/// Accumulate tag weights and keep the `top_k` heaviest.
///
/// Ties keep the order in which tags were first seen.
pub fn build_profile(interactions: &[ProfileInteraction], top_k: usize) -> Vec<InterestTag> {
    let mut order: Vec<InterestTag> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for interaction in interactions {
        let weight = interaction_weight(interaction.kind);
        if weight == 0.0 {
            continue;
        }
        for tag_id in &interaction.tag_ids {
            match index.get(tag_id.as_str()) {
                Some(&i) => order[i].weight += weight,
                None => {
                    index.insert(tag_id.as_str(), order.len());
                    order.push(InterestTag {
                        tag_id: tag_id.clone(),
                        weight,
                    });
                }
            }
        }
    }

    // sort_by is stable, so equal weights stay in first-seen order
    order.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(top_k);
    order
}

/// Build the interest profile for a user from the store.
///
/// Returns an empty list when the user has no qualifying history; callers
/// treat that as "no personalization signal".
pub async fn interest_profile<S: Store + ?Sized>(
    store: &S,
    user_id: &str,
    params: &ProfileParams,
) -> FeedResult<Vec<InterestTag>> {
    let recent = store
        .recent_interactions(user_id, &PROFILE_KINDS, params.window)
        .await?;
    let profile = build_profile(&recent, params.top_k);
    debug!(
        user_id,
        interactions = recent.len(),
        tags = profile.len(),
        "interest profile built"
    );
    Ok(profile)
}
