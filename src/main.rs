//! # devfeed CLI
//!
//! ## Usage
//!
//! ```bash
//! devfeed --config ./config/devfeed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `devfeed init` | Create the SQLite database and run schema migrations |
//! | `devfeed import <file>` | Load tags, items, and interactions from JSON |
//! | `devfeed recompute` | Run the score recomputation job once |
//! | `devfeed feed` | Print one feed page |
//! | `devfeed score <id>` | Print an item's scores |
//! | `devfeed stats` | Summarize the database |
//! | `devfeed serve` | Start the HTTP server and background recompute |
//!
//! ## Examples
//!
//! ```bash
//! devfeed init
//! devfeed import ./demos/projects.json
//! devfeed recompute
//! devfeed feed --user u42 --page-size 10
//! devfeed feed --tags rust,cli --sort newest
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use anyhow::bail;
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devfeed::config;
use devfeed::import;
use devfeed::migrate;
use devfeed::server;
use devfeed::service::{parse_filter, FeedService};
use devfeed::stats;
use devfeed_core::feed::FeedRequest;

/// devfeed: engagement scoring and personalized feeds for project showcases.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/devfeed.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "devfeed", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/devfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import tags, items, and seed interactions from a JSON file.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Recompute engagement scores for all approved items.
    ///
    /// Exits non-zero when the job fails as a whole. Per-item failures are
    /// reported but do not fail the run.
    Recompute,

    /// Print one page of the feed.
    Feed {
        /// Viewer id. Omit for the generic feed.
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Defaults to `[feed] default_page_size`.
        #[arg(long)]
        page_size: Option<u32>,

        /// Comma-separated tag slugs; items must carry all of them.
        #[arg(long)]
        tags: Option<String>,

        /// web_app, mobile_app, cli_tool, library, game, or other.
        #[arg(long)]
        project_type: Option<String>,

        /// score, newest, most_liked, or most_saved.
        #[arg(long)]
        sort: Option<String>,
    },

    /// Print the stored scores of one item.
    Score {
        /// Item id.
        id: String,
    },

    /// Summarize what is in the database.
    Stats,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and runs the recomputation job every
    /// `[scheduler].recompute_interval_secs`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devfeed=info,devfeed_core=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            let service = FeedService::open(&cfg).await?;
            let summary = import::import_path(service.store().as_ref(), &file).await?;
            println!(
                "Imported {} tags, {} items, {} interactions.",
                summary.tags, summary.items, summary.interactions
            );
        }
        Commands::Recompute => {
            let service = FeedService::open(&cfg).await?;
            let report = service.run_recompute(Utc::now()).await;
            println!(
                "Scored {} of {} items ({} failed). Snapshot refreshed: {}.",
                report.items_scored,
                report.items_total,
                report.items_failed,
                if report.snapshot_refreshed { "yes" } else { "no" }
            );
            if !report.success {
                bail!(
                    "recompute failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Feed {
            user,
            page,
            page_size,
            tags,
            project_type,
            sort,
        } => {
            let service = FeedService::open(&cfg).await?;
            let filter = parse_filter(tags.as_deref(), project_type.as_deref(), sort.as_deref())?;
            let req = FeedRequest {
                user_id: user,
                page,
                page_size: page_size.unwrap_or(service.settings().default_page_size),
                filter,
            };
            let feed_page = service.get_feed(&req, Utc::now()).await?;

            if feed_page.items.is_empty() {
                println!("No items.");
            }
            for (i, entry) in feed_page.items.iter().enumerate() {
                let tags: Vec<&str> = entry.item.tags.iter().map(|t| t.slug.as_str()).collect();
                let personalized = entry
                    .personalized_score
                    .map(|s| format!("  personalized={:.2}", s))
                    .unwrap_or_default();
                println!(
                    "{}. [{:.2}] {} ({})  tags={}{}",
                    i + 1,
                    entry.item.scores.final_score,
                    entry.item.title,
                    entry.item.id,
                    tags.join(","),
                    personalized
                );
            }
            println!(
                "strategy={} page={} has_more={}",
                serde_json::to_value(feed_page.strategy)?
                    .as_str()
                    .unwrap_or_default(),
                feed_page.page,
                feed_page.has_more
            );
        }
        Commands::Score { id } => {
            let service = FeedService::open(&cfg).await?;
            let Some(view) = service.get_score(&id).await? else {
                bail!("item not found: {}", id);
            };
            println!("item:             {}", view.item_id);
            println!("engagement_score: {:.2}", view.engagement_score);
            println!("final_score:      {:.4}", view.final_score);
            println!(
                "last_scored_at:   {}",
                view.last_scored_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
