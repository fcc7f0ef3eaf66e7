//! Handler for `analysis:analyze` tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::context::TaskContext;
use crate::models::AnalyzeRequest;
use crate::queue::{HandlerError, SkipRetry, TaskHandler};
use crate::services::analyzer::Analyzer;

pub const TYPE_ANALYZE: &str = "analysis:analyze";

/// Task payload. A missing `user_id` means public access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzePayload {
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AnalyzePayload {
    pub fn to_request(&self) -> AnalyzeRequest {
        AnalyzeRequest {
            analysis_id: None,
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

pub struct AnalyzeHandler {
    analyzer: Arc<Analyzer>,
}

impl AnalyzeHandler {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl TaskHandler for AnalyzeHandler {
    async fn process_task(&self, ctx: &TaskContext, payload: &[u8]) -> Result<(), HandlerError> {
        // Undecodable payloads go straight to the archive.
        let payload: AnalyzePayload = serde_json::from_slice(payload)
            .map_err(|e| SkipRetry::new(format!("unmarshal payload: {}", e)))?;

        info!(owner = %payload.owner, repo = %payload.repo, "Processing analyze task");

        if let Err(e) = self.analyzer.execute(ctx, &payload.to_request()).await {
            error!(
                owner = %payload.owner,
                repo = %payload.repo,
                kind = ?e.kind(),
                error = %e,
                "Analyze task failed"
            );
            return Err(Box::new(e));
        }

        info!(owner = %payload.owner, repo = %payload.repo, "Analyze task completed");
        Ok(())
    }
}
