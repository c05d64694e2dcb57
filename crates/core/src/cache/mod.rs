//! SQLite-backed cache for resolved question/answer pairs.
//!
//! This module provides a persistent, content-addressed cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Content-addressed keys (SHA-256 of the raw question text)
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Age-based reclamation with a hard entry ceiling
//! - Purges by age, origin host, or entry count

pub mod connection;
pub mod content;
pub mod entries;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheDb;
pub use content::{CacheStats, ContentCache};
pub use entries::CacheEntry;
pub use hash::{compute_cache_key, is_valid_key};
