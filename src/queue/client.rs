//! Producer side of the queue.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::AppResult;

use super::message::{DEFAULT_MAX_RETRY, TaskInfo, TaskMessage};
use super::QueueKeys;

#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    async fn enqueue(&self, task_type: &str, payload: &[u8]) -> AppResult<TaskInfo>;
}

#[derive(Clone)]
pub struct QueueClient {
    conn: ConnectionManager,
    queue: String,
    keys: QueueKeys,
    max_retry: u32,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.queue)
            .field("max_retry", &self.max_retry)
            .finish_non_exhaustive()
    }
}

impl QueueClient {
    pub async fn connect(redis_url: &str, queue: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, queue))
    }

    pub fn new(conn: ConnectionManager, queue: &str) -> Self {
        Self {
            conn,
            queue: queue.to_string(),
            keys: QueueKeys::new(queue),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl TaskEnqueuer for QueueClient {
    async fn enqueue(&self, task_type: &str, payload: &[u8]) -> AppResult<TaskInfo> {
        let msg = TaskMessage::new(task_type, payload, self.queue.as_str()).with_max_retry(self.max_retry);
        let raw = msg.encode()?;

        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(&self.keys.pending, raw).await?;

        debug!(task_id = %msg.id, task_type = %task_type, queue = %self.queue, "Task enqueued");
        Ok(msg.info())
    }
}
