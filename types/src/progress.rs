use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressState {
    InProgress,
    Completed,
    Failed,
}

/// Append-only; monotonic timestamps per `(domain, operation_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub domain: String,
    pub operation_id: String,
    pub state: ProgressState,
    pub completion_pct: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
