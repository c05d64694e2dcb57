//! Content-addressed cache key generation.
//!
//! Keys are derived from the raw question text. No case, whitespace or
//! punctuation normalization is applied, so "What is 2+2?" and
//! "what is 2+2?" map to different entries.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded key.
pub const KEY_LEN: usize = 64;

/// Compute the cache key for a question.
pub fn compute_cache_key(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `key` has the shape produced by [`compute_cache_key`].
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
