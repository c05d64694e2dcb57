//! Core types and shared functionality for recall.
//!
//! This crate provides:
//! - Answer cache with SQLite backend and age-based reclamation
//! - Quota limiter (sliding minute window, daily ceiling, call spacing)
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod quota;

pub use cache::{CacheDb, CacheEntry, CacheStats, ContentCache};
pub use config::AppConfig;
pub use error::Error;
pub use quota::{Clock, LimitDecision, QuotaLimiter, QuotaStats, SystemClock};
