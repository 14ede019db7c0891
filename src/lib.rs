//! # devfeed
//!
//! Engagement scoring and personalized feed assembly for a project showcase.
//!
//! The ranking logic lives in `devfeed-core`; this crate wires it to SQLite,
//! a TOML config, an axum HTTP API, a background scheduler, and the
//! `devfeed` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐
//! │   CLI    │  │   HTTP   │──┐
//! │(devfeed) │  │  (axum)  │  │ interactions
//! └────┬─────┘  └────┬─────┘  ▼
//!      │             │   ┌─────────────┐   ┌───────────┐
//!      └──────┬──────┘   │ FeedService │──▶│  Cache    │
//!             ▼          └──────┬──────┘   └───────────┘
//!      ┌─────────────┐          ▼
//!      │  Scheduler  │──▶ ┌─────────────┐
//!      │ (recompute) │    │ SqliteStore │
//!      └─────────────┘    └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`service`] | Cached feed and score reads, recompute entry point |
//! | [`interactions`] | Like/save toggles, views, shares, clicks, comments |
//! | [`scheduler`] | Periodic recomputation |
//! | [`import`] | JSON import |
//! | [`stats`] | Database summary |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod import;
pub mod interactions;
pub mod migrate;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod stats;
