//! Task model: queued units of agent work and the store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Task identity. Assigned once by the store and never reused.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Instruction text.
    pub content: String,
    /// Output on success, error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable, ordered task queue.
///
/// Each call is atomic on its own; there are no cross-call transactions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Add a pending task and return its identity.
    async fn enqueue(&self, content: &str) -> Result<TaskId>;

    /// Oldest pending task, ties broken by creation order.
    async fn next_pending(&self) -> Result<Option<Task>>;

    /// Update status (and result, when given). Returns the number of tasks updated.
    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<usize>;

    /// All tasks, or those with the given status.
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    async fn remove(&self, id: TaskId) -> Result<()>;
}
