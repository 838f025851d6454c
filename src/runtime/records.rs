//! Records forwarded to the host: terminal per-item errors and progress.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Activity id carried by every progress record of a bulk invocation.
pub const PROGRESS_ACTIVITY_ID: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Target absent and the item was not marked idempotent.
    NotFound,
    /// Non-retryable service fault.
    Fault,
    /// Transient failures outlasted the retry budget.
    RetriesExhausted,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::NotFound => "not found",
            ErrorCategory::Fault => "fault",
            ErrorCategory::RetriesExhausted => "retries exhausted",
        };
        f.write_str(label)
    }
}

/// One terminal failure, attached to the input record that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub input: Value,
    pub target: String,
    pub key: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
    pub attempts: u32,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "{} {key}: {} after {} attempt(s): {}",
                self.target, self.category, self.attempts, self.message
            ),
            None => write!(
                f,
                "{}: {} after {} attempt(s): {}",
                self.target, self.category, self.attempts, self.message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    pub activity_id: i32,
    pub activity: String,
    pub status: String,
    pub percent_complete: u8,
    pub completed_items: u64,
    pub total_items: u64,
    /// Set only on the terminal record emitted once the engine finishes.
    pub completed: bool,
}

impl ProgressRecord {
    pub fn update(activity: &str, completed_items: u64, total_items: u64) -> Self {
        Self {
            activity_id: PROGRESS_ACTIVITY_ID,
            activity: activity.to_string(),
            status: format!("{completed_items} of {total_items} completed"),
            percent_complete: percent(completed_items, total_items),
            completed_items,
            total_items,
            completed: false,
        }
    }

    pub fn finished(activity: &str, total_items: u64) -> Self {
        Self {
            activity_id: PROGRESS_ACTIVITY_ID,
            activity: activity.to_string(),
            status: "Completed".to_string(),
            percent_complete: 100,
            completed_items: total_items,
            total_items,
            completed: true,
        }
    }
}

/// `completed * 100 / total`, clamped to 0..=100.
pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = completed.saturating_mul(100) / total;
    value.min(100) as u8
}
