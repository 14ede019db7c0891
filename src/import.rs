//! `devfeed import`: load tags, items, and seed interactions from JSON.
//!
//! ```json
//! {
//!   "tags":  [{ "id": "t-rust", "name": "Rust", "category": "language", "slug": "rust" }],
//!   "items": [{ "id": "p1", "owner_id": "u1", "title": "Ferris CLI",
//!               "project_type": "cli_tool", "tags": ["rust"],
//!               "submitted_at": "2026-10-01T12:00:00Z" }],
//!   "interactions": [{ "actor": "u2", "item": "p1", "kind": "save" }]
//! }
//! ```
//!
//! Items reference tags by slug. `status` defaults to `approved`, `slug` to
//! the id, and counters to zero. Likes and saves go through the toggle path
//! so counters stay consistent; other kinds are appended.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use devfeed_core::models::{
    ComputedScores, ContentItem, ContentStatus, Counters, InteractionKind, InteractionMeta,
    InteractionRecord, ProjectType, Tag,
};
use devfeed_core::store::Store;

#[derive(Debug, Deserialize)]
pub struct ImportFile {
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub items: Vec<ImportItem>,
    #[serde(default)]
    pub interactions: Vec<ImportInteraction>,
}

#[derive(Debug, Deserialize)]
pub struct ImportItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub project_type: ProjectType,
    #[serde(default = "default_status")]
    pub status: ContentStatus,
    /// Tag slugs, primary first.
    #[serde(default)]
    pub tags: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: Counters,
}

fn default_status() -> ContentStatus {
    ContentStatus::Approved
}

#[derive(Debug, Deserialize)]
pub struct ImportInteraction {
    #[serde(default)]
    pub actor: Option<String>,
    pub item: String,
    pub kind: InteractionKind,
    #[serde(default)]
    pub dwell_secs: Option<u32>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub tags: usize,
    pub items: usize,
    pub interactions: usize,
}

pub fn parse_import(content: &str) -> Result<ImportFile> {
    serde_json::from_str(content).with_context(|| "Failed to parse import file")
}

/// Write an import file's contents to the store.
pub async fn import_into<S: Store + ?Sized>(store: &S, file: &ImportFile) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut by_slug: HashMap<&str, &Tag> = HashMap::new();

    for tag in &file.tags {
        store
            .upsert_tag(tag)
            .await
            .with_context(|| format!("Failed to import tag '{}'", tag.slug))?;
        by_slug.insert(tag.slug.as_str(), tag);
        summary.tags += 1;
    }

    for entry in &file.items {
        let mut tags = Vec::with_capacity(entry.tags.len());
        for slug in &entry.tags {
            match by_slug.get(slug.as_str()) {
                Some(tag) => tags.push((*tag).clone()),
                None => bail!("item '{}' references unknown tag slug '{}'", entry.id, slug),
            }
        }

        let item = ContentItem {
            id: entry.id.clone(),
            owner_id: entry.owner_id.clone(),
            title: entry.title.clone(),
            slug: entry.slug.clone().unwrap_or_else(|| entry.id.clone()),
            project_type: entry.project_type,
            status: entry.status,
            tags,
            submitted_at: entry.submitted_at,
            counters: entry.counters,
            scores: ComputedScores::default(),
            last_scored_at: None,
        };
        store
            .upsert_item(&item)
            .await
            .with_context(|| format!("Failed to import item '{}'", entry.id))?;
        summary.items += 1;
    }

    let now = Utc::now();
    for entry in &file.interactions {
        let at = entry.at.unwrap_or(now);
        if entry.kind.is_reversible() {
            let Some(actor) = entry.actor.as_deref() else {
                bail!("{} on item '{}' needs an actor", entry.kind, entry.item);
            };
            store
                .toggle_interaction(actor, &entry.item, entry.kind, at)
                .await
                .with_context(|| format!("Failed to import {} on '{}'", entry.kind, entry.item))?;
        } else {
            if entry.kind == InteractionKind::Comment {
                bail!("comments cannot be imported as interactions (item '{}')", entry.item);
            }
            let meta = match entry.kind {
                InteractionKind::View => InteractionMeta::View {
                    dwell_secs: entry.dwell_secs.unwrap_or(0),
                    referrer: None,
                },
                _ => InteractionMeta::None,
            };
            store
                .append_interaction(&InteractionRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    actor_id: entry.actor.clone(),
                    item_id: entry.item.clone(),
                    kind: entry.kind,
                    meta,
                    created_at: at,
                })
                .await
                .with_context(|| format!("Failed to import {} on '{}'", entry.kind, entry.item))?;
        }
        summary.interactions += 1;
    }

    Ok(summary)
}

/// Read `path` and import it.
pub async fn import_path<S: Store + ?Sized>(store: &S, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let file = parse_import(&content)?;
    import_into(store, &file).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use devfeed_core::store::memory::InMemoryStore;

    const SAMPLE: &str = r#"
    {
      "tags": [
        { "id": "t-rust", "name": "Rust", "category": "language", "slug": "rust" },
        { "id": "t-react", "name": "React", "category": "frontend", "slug": "react" }
      ],
      "items": [
        { "id": "p1", "owner_id": "u1", "title": "Ferris CLI", "project_type": "cli_tool",
          "tags": ["rust"], "submitted_at": "2026-10-01T12:00:00Z" },
        { "id": "p2", "owner_id": "u2", "title": "Dashboard", "project_type": "web_app",
          "status": "pending", "tags": ["react", "rust"], "submitted_at": "2026-10-02T12:00:00Z" }
      ],
      "interactions": [
        { "actor": "u3", "item": "p1", "kind": "save" },
        { "item": "p1", "kind": "view", "dwell_secs": 150 }
      ]
    }
    "#;

    #[tokio::test]
    async fn test_import_resolves_tags_in_order() {
        let store = InMemoryStore::new();
        let file = parse_import(SAMPLE).unwrap();
        let summary = import_into(&store, &file).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                tags: 2,
                items: 2,
                interactions: 2
            }
        );

        let p2 = store.get_item("p2").await.unwrap().unwrap();
        assert_eq!(p2.status, ContentStatus::Pending);
        let slugs: Vec<&str> = p2.tags.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["react", "rust"]);
        assert_eq!(p2.slug, "p2");

        let p1 = store.get_item("p1").await.unwrap().unwrap();
        assert_eq!(p1.counters.saves, 1);
        assert_eq!(p1.counters.views, 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_slug_fails() {
        let store = InMemoryStore::new();
        let file = parse_import(
            r#"{ "items": [ { "id": "p1", "owner_id": "u1", "title": "x",
                 "project_type": "game", "tags": ["cobol"],
                 "submitted_at": "2026-10-01T12:00:00Z" } ] }"#,
        )
        .unwrap();
        let err = import_into(&store, &file).await.unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(parse_import("{ not json").is_err());
    }
}
