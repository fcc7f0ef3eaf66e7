//! Redis-backed task queue.
//!
//! Each queue `q` owns four keys:
//! - `collector:{q}:pending`  list, producers `LPUSH`, workers take from the right
//! - `collector:{q}:active`   list of messages currently being processed
//! - `collector:{q}:retry`    sorted set scored by the unix second a retry is due
//! - `collector:{q}:archived` list of dead-lettered messages

pub mod client;
pub mod message;
pub mod server;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TaskContext;

pub use client::{QueueClient, TaskEnqueuer};
pub use message::{DEFAULT_MAX_RETRY, TaskInfo, TaskMessage};
pub use server::{QueueServer, ServerOptions};

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Wrap a handler error to send the task straight to the archive.
#[derive(Debug, thiserror::Error)]
#[error("{source} (not retried)")]
pub struct SkipRetry {
    #[source]
    source: HandlerError,
}

impl SkipRetry {
    pub fn new(source: impl Into<HandlerError>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// True if `err` or anything in its source chain is a [`SkipRetry`].
pub fn is_skip_retry(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<SkipRetry>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[derive(Debug, thiserror::Error)]
#[error("no handler registered for task type {0:?}")]
pub struct UnknownTaskType(pub String);

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process_task(&self, ctx: &TaskContext, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Routes tasks to handlers by type name.
#[derive(Clone, Default)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub async fn dispatch(
        &self,
        ctx: &TaskContext,
        task_type: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        match self.handlers.get(task_type) {
            Some(handler) => handler.process_task(ctx, payload).await,
            None => Err(Box::new(UnknownTaskType(task_type.to_string()))),
        }
    }
}

impl std::fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeMux")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueKeys {
    pub pending: String,
    pub active: String,
    pub retry: String,
    pub archived: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> Self {
        let prefix = format!("collector:{{{}}}", queue);
        Self {
            pending: format!("{}:pending", prefix),
            active: format!("{}:active", prefix),
            retry: format!("{}:retry", prefix),
            archived: format!("{}:archived", prefix),
        }
    }
}
