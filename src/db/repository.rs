//! Store seams used by the orchestrator and the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{CreateAnalysisRecordParams, DueCodebase, SaveAnalysisInventoryParams};

/// Analysis lifecycle writes. Each call is one transaction.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Upsert the codebase and insert a `running` analysis, returning its id.
    async fn create_analysis_record(&self, params: &CreateAnalysisRecordParams)
    -> AppResult<Uuid>;

    /// Persist the suite tree and mark the analysis `completed`.
    async fn save_analysis_inventory(&self, params: &SaveAnalysisInventoryParams) -> AppResult<()>;

    /// Mark the analysis `failed` with a truncated message.
    async fn record_failure(&self, analysis_id: Uuid, error_message: &str) -> AppResult<()>;
}

#[async_trait]
pub trait RefreshRepository: Send + Sync {
    /// Codebases with a completed analysis and no refresh activity after
    /// `cutoff`, least recently handled first.
    async fn list_due_for_refresh(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<DueCodebase>>;

    /// Note that a refresh was enqueued or skipped, pushing the codebase to
    /// the back of the due list.
    async fn mark_refresh_checked(&self, codebase_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;
}
