use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Action name plus free-form data, the unit the durable queue persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub action: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Active,
    Succeeded,
    Failed { retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
}

impl Job {
    pub fn new(topic: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: JobPayload {
                action: action.into(),
                data,
            },
            status: JobStatus::Queued,
            attempts: 0,
        }
    }

    /// A job is runnable when it still owes the caller a resolution: queued,
    /// or accepted but not finished before a restart.
    pub fn is_runnable(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Active)
    }
}
