use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn devfeed_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_devfeed"))
}

const SEED: &str = r#"
{
  "tags": [
    { "id": "t-rust", "name": "Rust", "category": "language", "slug": "rust" },
    { "id": "t-react", "name": "React", "category": "frontend", "slug": "react" },
    { "id": "t-postgres", "name": "PostgreSQL", "category": "database", "slug": "postgres" }
  ],
  "items": [
    { "id": "ferris-cli", "owner_id": "alice", "title": "Ferris CLI",
      "project_type": "cli_tool", "tags": ["rust"],
      "submitted_at": "2026-10-10T09:00:00Z" },
    { "id": "kanban", "owner_id": "bob", "title": "Kanban Board",
      "project_type": "web_app", "tags": ["react", "postgres"],
      "submitted_at": "2026-10-12T09:00:00Z" },
    { "id": "queue-rs", "owner_id": "carol", "title": "Queue in Rust",
      "project_type": "library", "tags": ["rust", "postgres"],
      "submitted_at": "2026-10-14T09:00:00Z" },
    { "id": "draft", "owner_id": "dave", "title": "Unreviewed Draft",
      "project_type": "game", "status": "pending", "tags": [],
      "submitted_at": "2026-10-15T09:00:00Z" }
  ],
  "interactions": [
    { "actor": "u1", "item": "ferris-cli", "kind": "save" },
    { "actor": "u2", "item": "ferris-cli", "kind": "save" },
    { "actor": "u3", "item": "kanban", "kind": "like" },
    { "actor": "u3", "item": "queue-rs", "kind": "save" },
    { "item": "queue-rs", "kind": "view", "dwell_secs": 200 }
  ]
}
"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/devfeed.sqlite"

[scheduler]
recompute_interval_secs = 0

[server]
bind = "127.0.0.1:7440"
"#,
        root.display()
    );

    let config_path = config_dir.join("devfeed.toml");
    fs::write(&config_path, config_content).unwrap();
    fs::write(root.join("seed.json"), SEED).unwrap();

    (tmp, config_path)
}

fn run_devfeed(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = devfeed_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run devfeed binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Init, import the seed file, and recompute.
fn seeded_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let seed = tmp.path().join("seed.json");

    let (_, stderr, ok) = run_devfeed(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let (stdout, stderr, ok) = run_devfeed(&config_path, &["import", seed.to_str().unwrap()]);
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("Imported 3 tags, 4 items, 5 interactions"));
    let (_, stderr, ok) = run_devfeed(&config_path, &["recompute"]);
    assert!(ok, "recompute failed: {}", stderr);

    (tmp, config_path)
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_devfeed(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let (_, stderr, success) = run_devfeed(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_devfeed(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_recompute_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    let seed = tmp.path().join("seed.json");
    run_devfeed(&config_path, &["init"]);
    run_devfeed(&config_path, &["import", seed.to_str().unwrap()]);

    let (stdout, stderr, success) = run_devfeed(&config_path, &["recompute"]);
    assert!(success, "recompute failed: {}", stderr);
    // The pending draft is not scored.
    assert!(stdout.contains("Scored 3 of 3 items (0 failed)"), "{}", stdout);
    assert!(stdout.contains("Snapshot refreshed: yes"));
}

#[test]
fn test_score_shows_engagement() {
    let (_tmp, config_path) = seeded_env();

    // Two saves.
    let (stdout, _, success) = run_devfeed(&config_path, &["score", "ferris-cli"]);
    assert!(success);
    assert!(stdout.contains("engagement_score: 100.00"), "{}", stdout);

    // One save and one long view.
    let (stdout, _, success) = run_devfeed(&config_path, &["score", "queue-rs"]);
    assert!(success);
    assert!(stdout.contains("engagement_score: 70.00"), "{}", stdout);

    let (_, stderr, success) = run_devfeed(&config_path, &["score", "missing"]);
    assert!(!success);
    assert!(stderr.contains("item not found"));
}

#[test]
fn test_generic_feed_lists_approved_items() {
    let (_tmp, config_path) = seeded_env();

    let (stdout, stderr, success) = run_devfeed(&config_path, &["feed"]);
    assert!(success, "feed failed: {}", stderr);
    assert!(stdout.contains("strategy=generic"));
    assert!(stdout.contains("Ferris CLI"));
    assert!(stdout.contains("Kanban Board"));
    assert!(!stdout.contains("Unreviewed Draft"));

    let ferris = stdout.find("Ferris CLI").unwrap();
    let kanban = stdout.find("Kanban Board").unwrap();
    assert!(ferris < kanban, "higher score should come first:\n{}", stdout);
}

#[test]
fn test_personalized_feed_for_user_with_history() {
    let (_tmp, config_path) = seeded_env();

    let (stdout, stderr, success) = run_devfeed(&config_path, &["feed", "--user", "u3"]);
    assert!(success, "feed failed: {}", stderr);
    assert!(stdout.contains("strategy=personalized"), "{}", stdout);
    assert!(stdout.contains("personalized="));

    // No history falls back to the generic path.
    let (stdout, _, _) = run_devfeed(&config_path, &["feed", "--user", "newcomer"]);
    assert!(stdout.contains("strategy=generic"));
}

#[test]
fn test_filtered_feed() {
    let (_tmp, config_path) = seeded_env();

    let (stdout, stderr, success) = run_devfeed(
        &config_path,
        &["feed", "--tags", "rust,postgres", "--sort", "newest"],
    );
    assert!(success, "feed failed: {}", stderr);
    assert!(stdout.contains("strategy=filtered"));
    assert!(stdout.contains("Queue in Rust"));
    assert!(!stdout.contains("Ferris CLI"));
    assert!(!stdout.contains("Kanban Board"));

    let (_, stderr, success) = run_devfeed(&config_path, &["feed", "--sort", "loudest"]);
    assert!(!success);
    assert!(stderr.contains("unknown sort key"));
}

#[test]
fn test_feed_rejects_bad_page() {
    let (_tmp, config_path) = seeded_env();

    let (_, stderr, success) = run_devfeed(&config_path, &["feed", "--page", "0"]);
    assert!(!success);
    assert!(stderr.contains("page must be >= 1"));

    let (_, stderr, success) = run_devfeed(&config_path, &["feed", "--page-size", "500"]);
    assert!(!success);
    assert!(stderr.contains("page_size"));
}

#[test]
fn test_stats_after_import() {
    let (_tmp, config_path) = seeded_env();

    let (stdout, stderr, success) = run_devfeed(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Items:         4"));
    assert!(stdout.contains("Scored:        3 / 4"));
    assert!(stdout.contains("Top scores:"));
    assert!(stdout.contains("Ferris CLI"));
}

#[test]
fn test_import_unknown_tag_fails() {
    let (tmp, config_path) = setup_test_env();
    run_devfeed(&config_path, &["init"]);

    let bad = tmp.path().join("bad.json");
    fs::write(
        &bad,
        r#"{ "items": [ { "id": "x", "owner_id": "o", "title": "X", "project_type": "game",
             "tags": ["cobol"], "submitted_at": "2026-10-01T00:00:00Z" } ] }"#,
    )
    .unwrap();
    let (_, stderr, success) = run_devfeed(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("cobol"));
}
