//! Core data models shared by the ranking pipeline.
//!
//! Content items, tags, interactions, and comments are owned by external
//! workflows (submission, moderation, ingestion). The ranking core reads
//! them and writes back only the computed score fields.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation status of a submitted project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Approved,
    Rejected,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(ContentStatus::Pending),
            "approved" => Ok(ContentStatus::Approved),
            "rejected" => Ok(ContentStatus::Rejected),
            other => bail!("unknown content status: '{}'", other),
        }
    }
}

/// Kind of project a submission describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    WebApp,
    MobileApp,
    CliTool,
    Library,
    Game,
    Other,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::WebApp => "web_app",
            ProjectType::MobileApp => "mobile_app",
            ProjectType::CliTool => "cli_tool",
            ProjectType::Library => "library",
            ProjectType::Game => "game",
            ProjectType::Other => "other",
        }
    }
}

impl FromStr for ProjectType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "web_app" => Ok(ProjectType::WebApp),
            "mobile_app" => Ok(ProjectType::MobileApp),
            "cli_tool" => Ok(ProjectType::CliTool),
            "library" => Ok(ProjectType::Library),
            "game" => Ok(ProjectType::Game),
            "other" => Ok(ProjectType::Other),
            other => bail!(
                "unknown project type: '{}'. Use web_app, mobile_app, cli_tool, library, game, or other.",
                other
            ),
        }
    }
}

/// Taxonomy bucket for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    Language,
    Frontend,
    Backend,
    Database,
    Deployment,
    AiMl,
}

impl TagCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagCategory::Language => "language",
            TagCategory::Frontend => "frontend",
            TagCategory::Backend => "backend",
            TagCategory::Database => "database",
            TagCategory::Deployment => "deployment",
            TagCategory::AiMl => "ai_ml",
        }
    }
}

impl FromStr for TagCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "language" => Ok(TagCategory::Language),
            "frontend" => Ok(TagCategory::Frontend),
            "backend" => Ok(TagCategory::Backend),
            "database" => Ok(TagCategory::Database),
            "deployment" => Ok(TagCategory::Deployment),
            "ai_ml" => Ok(TagCategory::AiMl),
            other => bail!("unknown tag category: '{}'", other),
        }
    }
}

/// Static reference tag attached to content items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub category: TagCategory,
    pub slug: String,
}

/// Raw counters maintained by the interaction handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub views: i64,
    pub likes: i64,
    pub saves: i64,
    pub comments: i64,
}

/// The three fields written back by the recomputation job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedScores {
    pub engagement_score: f64,
    pub recency_factor: f64,
    pub final_score: f64,
}

/// A submitted project as seen by the ranking core.
///
/// `tags` is ordered by attach order; the first tag is the item's primary
/// tag for diversification. `last_scored_at` is `None` until the first
/// recomputation touches the item, so callers can detect stale scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub slug: String,
    pub project_type: ProjectType,
    pub status: ContentStatus,
    pub tags: Vec<Tag>,
    pub submitted_at: DateTime<Utc>,
    pub counters: Counters,
    pub scores: ComputedScores,
    pub last_scored_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn has_tag_slug(&self, slug: &str) -> bool {
        self.tags.iter().any(|t| t.slug == slug)
    }
}

/// Interaction types recorded against content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Like,
    Save,
    Share,
    Comment,
    ClickDemo,
    ClickSource,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::Like => "like",
            InteractionKind::Save => "save",
            InteractionKind::Share => "share",
            InteractionKind::Comment => "comment",
            InteractionKind::ClickDemo => "click_demo",
            InteractionKind::ClickSource => "click_source",
        }
    }

    /// Only likes and saves may be removed (unlike / unsave).
    pub fn is_reversible(&self) -> bool {
        matches!(self, InteractionKind::Like | InteractionKind::Save)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "view" => Ok(InteractionKind::View),
            "like" => Ok(InteractionKind::Like),
            "save" => Ok(InteractionKind::Save),
            "share" => Ok(InteractionKind::Share),
            "comment" => Ok(InteractionKind::Comment),
            "click_demo" => Ok(InteractionKind::ClickDemo),
            "click_source" => Ok(InteractionKind::ClickSource),
            other => bail!("unknown interaction kind: '{}'", other),
        }
    }
}

/// Typed metadata carried by an interaction, keyed by its kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionMeta {
    View {
        dwell_secs: u32,
        referrer: Option<String>,
    },
    Comment {
        comment_id: String,
    },
    #[default]
    None,
}

impl InteractionMeta {
    pub fn dwell_secs(&self) -> Option<u32> {
        match self {
            InteractionMeta::View { dwell_secs, .. } => Some(*dwell_secs),
            _ => None,
        }
    }
}

/// One append-only interaction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    /// `None` for anonymous views.
    pub actor_id: Option<String>,
    pub item_id: String,
    pub kind: InteractionKind,
    pub meta: InteractionMeta,
    pub created_at: DateTime<Utc>,
}

/// Comment row, read by the job for author-reply and long-comment counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub item_id: String,
    pub author_id: String,
    pub parent_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Minimal projection loaded by the job for each approved item.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringTarget {
    pub id: String,
    pub owner_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// A recent interaction joined to the tags of the item it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileInteraction {
    pub kind: InteractionKind,
    pub tag_ids: Vec<String>,
}

/// A single entry of a user's interest profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestTag {
    pub tag_id: String,
    pub weight: f64,
}

/// Cached score read model for a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreView {
    pub item_id: String,
    pub engagement_score: f64,
    pub final_score: f64,
    pub last_scored_at: Option<DateTime<Utc>>,
}

impl From<&ContentItem> for ScoreView {
    fn from(item: &ContentItem) -> Self {
        Self {
            item_id: item.id.clone(),
            engagement_score: item.scores.engagement_score,
            final_score: item.scores.final_score,
            last_scored_at: item.last_scored_at,
        }
    }
}

/// Row of the materialized top-score snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopScore {
    pub rank: i64,
    pub item_id: String,
    pub title: String,
    pub engagement_score: f64,
    pub final_score: f64,
}

/// Result of a like/save toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    /// Whether the interaction exists after the toggle.
    pub active: bool,
    /// The item's counter after the toggle.
    pub count: i64,
}

/// Which of a set of items a viewer has liked or saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerState {
    pub liked: HashSet<String>,
    pub saved: HashSet<String>,
}

/// Items that expose a primary tag for diversification.
pub trait PrimaryTag {
    /// Identifier of the first attached tag, if any.
    fn primary_tag(&self) -> Option<&str>;
}

impl PrimaryTag for ContentItem {
    fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(|t| t.id.as_str())
    }
}
