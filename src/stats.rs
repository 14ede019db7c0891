//! Database statistics and ranking overview.
//!
//! Used by `devfeed stats` to show what is loaded, how much engagement has
//! been recorded, and when scores were last recomputed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Snapshot of table counts.
#[derive(Debug, Default)]
pub struct Stats {
    pub tags: i64,
    pub items_by_status: Vec<(String, i64)>,
    pub interactions_by_kind: Vec<(String, i64)>,
    pub comments: i64,
    pub scored_items: i64,
    /// Unix milliseconds of the most recent score write.
    pub last_scored_ms: Option<i64>,
    pub top: Vec<(i64, String, f64)>,
}

impl Stats {
    pub fn total_items(&self) -> i64 {
        self.items_by_status.iter().map(|(_, n)| n).sum()
    }

    pub fn total_interactions(&self) -> i64 {
        self.interactions_by_kind.iter().map(|(_, n)| n).sum()
    }
}

pub async fn collect_stats(pool: &SqlitePool, top_n: i64) -> Result<Stats> {
    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(pool)
        .await?;

    let items_by_status = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM items GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("n")))
    .collect();

    let interactions_by_kind = sqlx::query(
        "SELECT kind, COUNT(*) AS n FROM interactions GROUP BY kind ORDER BY n DESC, kind",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get::<String, _>("kind"), row.get::<i64, _>("n")))
    .collect();

    let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
        .fetch_one(pool)
        .await?;

    let scored_row = sqlx::query(
        "SELECT COUNT(last_scored_at) AS scored, MAX(last_scored_at) AS last FROM items",
    )
    .fetch_one(pool)
    .await?;

    let top = sqlx::query(
        "SELECT rank, title, final_score FROM top_scores ORDER BY rank LIMIT ?",
    )
    .bind(top_n)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        (
            row.get::<i64, _>("rank"),
            row.get::<String, _>("title"),
            row.get::<f64, _>("final_score"),
        )
    })
    .collect();

    Ok(Stats {
        tags,
        items_by_status,
        interactions_by_kind,
        comments,
        scored_items: scored_row.get("scored"),
        last_scored_ms: scored_row.get("last"),
        top,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool, 5).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("devfeed - Database Stats");
    println!("========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Tags:          {}", stats.tags);
    println!("  Items:         {}", stats.total_items());
    for (status, n) in &stats.items_by_status {
        println!("    {:<12} {}", status, n);
    }
    println!("  Interactions:  {}", stats.total_interactions());
    for (kind, n) in &stats.interactions_by_kind {
        println!("    {:<12} {}", kind, n);
    }
    println!("  Comments:      {}", stats.comments);
    println!();
    println!(
        "  Scored:        {} / {}",
        stats.scored_items,
        stats.total_items()
    );
    println!(
        "  Last scored:   {}",
        match stats.last_scored_ms {
            Some(ms) => format_ts_relative(ms / 1000),
            None => "never".to_string(),
        }
    );

    if !stats.top.is_empty() {
        println!();
        println!("  Top scores:");
        println!("  {:>4}  {:<40} {:>10}", "RANK", "TITLE", "SCORE");
        println!("  {}", "-".repeat(56));
        for (rank, title, score) in &stats.top {
            println!("  {:>4}  {:<40} {:>10.2}", rank, truncate(title, 40), score);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp (seconds) as a relative time string.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 || delta >= 86400 * 30 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string());
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
