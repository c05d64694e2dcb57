//! Cache-related MCP tools.
//!
//! This module provides tools for inspecting and pruning the answer cache.

pub mod get;
pub mod purge;
pub mod stats;

pub use get::{CacheGetParams, get_impl};
pub use purge::{CachePurgeParams, clear_impl, purge_impl};
pub use stats::stats_impl;
