//! Queue envelope stored in Redis as JSON.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Longest error text kept on an envelope.
const MAX_ERROR_MSG_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    /// Base64 of the opaque payload bytes.
    pub payload: String,
    pub queue: String,
    #[serde(default)]
    pub retried: u32,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<DateTime<Utc>>,
}

impl TaskMessage {
    pub fn new(task_type: impl Into<String>, payload: &[u8], queue: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload: STANDARD.encode(payload),
            queue: queue.into(),
            retried: 0,
            max_retry: DEFAULT_MAX_RETRY,
            enqueued_at: Utc::now(),
            error_msg: None,
            last_failed_at: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn payload_bytes(&self) -> AppResult<Vec<u8>> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| AppError::Queue(format!("task {} payload is not base64: {}", self.id, e)))
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }

    /// Copy with the failure recorded.
    pub fn failed(&self, error: &str) -> Self {
        let mut next = self.clone();
        next.error_msg = Some(error.chars().take(MAX_ERROR_MSG_LENGTH).collect());
        next.last_failed_at = Some(Utc::now());
        next
    }

    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Queue(format!("failed to encode task {}: {}", self.id, e)))
    }

    pub fn decode(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Queue(format!("failed to decode task envelope: {}", e)))
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            task_type: self.task_type.clone(),
            queue: self.queue.clone(),
        }
    }
}

/// What a producer learns about an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Uuid,
    pub task_type: String,
    pub queue: String,
}
