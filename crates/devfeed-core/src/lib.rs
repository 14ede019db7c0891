//! # devfeed core
//!
//! Runtime-agnostic ranking logic for devfeed: data models, engagement
//! scoring, the batch recomputation job, interest profiles, feed assembly,
//! diversification, and the read-through cache layer.
//!
//! Storage goes through the [`store::Store`] trait. This crate carries no
//! database driver or HTTP stack; the `devfeed` application crate supplies
//! the SQLite backend, configuration, CLI, and server.

pub mod cache;
pub mod diversify;
pub mod error;
pub mod feed;
pub mod models;
pub mod profile;
pub mod recompute;
pub mod scoring;
pub mod store;

pub use error::{FeedError, FeedResult};
