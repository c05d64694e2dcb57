//! Bounded log of settled queue requests.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::endpoint::error::truncate_chars;

/// Characters of the question kept in a log entry.
pub const QUESTION_PREVIEW_CHARS: usize = 50;

/// Terminal outcome of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Succeeded,
    Failed,
    RateLimited,
}

/// One settled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LogEntry {
    pub status: RequestStatus,
    /// Question prefix, at most [`QUESTION_PREVIEW_CHARS`] characters.
    pub question: String,
    /// Endpoint attempts made, including the first.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 settlement time.
    pub settled_at: String,
}

impl LogEntry {
    pub fn new(status: RequestStatus, question: &str, attempts: u32, error: Option<String>) -> Self {
        Self {
            status,
            question: truncate_chars(question, QUESTION_PREVIEW_CHARS),
            attempts,
            error,
            settled_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Ring buffer that drops the oldest entry once full.
#[derive(Debug, Clone)]
pub struct RequestLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}
