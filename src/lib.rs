//! Incremental per-user feed synchronization for paginated short-video
//! search APIs.
//!
//! - [`source`] - the content source trait and its HTTP client
//! - [`storage`] - SQLite persistence for subscriptions and feed items
//! - [`sync`] - sync engine, retention, and the periodic scheduler
//! - [`config`] - optional TOML configuration

pub mod config;
pub mod source;
pub mod storage;
pub mod sync;
