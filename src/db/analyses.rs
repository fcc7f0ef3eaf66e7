//! Database queries for analyses.
//!
//! Every write runs in one transaction. Status transitions only apply to
//! rows still in `running`, so terminal states never change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::analysis::{self, ActiveModel, Entity as Analysis};
use crate::entity::{test_case, test_suite};
use crate::error::{AppError, AppResult};
use crate::models::{
    AnalysisStatus, CreateAnalysisRecordParams, DEFAULT_HOST, DueCodebase,
    SaveAnalysisInventoryParams,
};

use super::codebases::upsert_codebase_with;
use super::inventory::{TransactionSink, truncate_error_message, write_inventory};
use super::repository::{AnalysisRepository, RefreshRepository};
use super::DbPool;

#[derive(Debug, FromQueryResult)]
struct DueRow {
    codebase_id: Uuid,
    host: String,
    owner: String,
    name: String,
    last_commit_sha: String,
    last_completed_at: DateTime<Utc>,
    requested_by: Option<String>,
}

impl From<DueRow> for DueCodebase {
    fn from(row: DueRow) -> Self {
        DueCodebase {
            codebase_id: row.codebase_id,
            host: row.host,
            owner: row.owner,
            name: row.name,
            last_commit_sha: row.last_commit_sha,
            last_completed_at: row.last_completed_at,
            requested_by: row.requested_by,
        }
    }
}

/// The last completed analysis supplies the commit to compare against. Its
/// age is measured from the newest of: that completion, the start of any later
/// attempt (running or failed), and the scheduler's last check. A failed
/// refresh therefore defers the next one by a full interval instead of
/// excluding the codebase, and a skipped codebase moves behind the others.
const DUE_FOR_REFRESH_SQL: &str = r#"
    WITH last_completed AS (
        SELECT DISTINCT ON (codebase_id)
            codebase_id, commit_sha, completed_at, requested_by
        FROM analyses
        WHERE status = 'completed' AND completed_at IS NOT NULL
        ORDER BY codebase_id, completed_at DESC, id DESC
    ),
    last_attempt AS (
        SELECT codebase_id, MAX(started_at) AS started_at
        FROM analyses
        GROUP BY codebase_id
    ),
    candidates AS (
        SELECT
            c.id AS codebase_id,
            c.host,
            c.owner,
            c.name,
            lc.commit_sha AS last_commit_sha,
            lc.completed_at AS last_completed_at,
            lc.requested_by,
            GREATEST(lc.completed_at, la.started_at, c.last_refresh_checked_at) AS last_activity_at
        FROM last_completed lc
        JOIN codebases c ON c.id = lc.codebase_id
        JOIN last_attempt la ON la.codebase_id = lc.codebase_id
    )
    SELECT
        codebase_id, host, owner, name, last_commit_sha, last_completed_at, requested_by
    FROM candidates
    WHERE last_activity_at <= $1
    ORDER BY last_activity_at ASC, codebase_id ASC
    LIMIT $2
"#;

impl DbPool {
    async fn begin(&self) -> AppResult<DatabaseTransaction> {
        self.connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))
    }

    /// Create a `running` analysis, upserting its codebase in the same transaction.
    pub async fn insert_running_analysis(
        &self,
        params: &CreateAnalysisRecordParams,
    ) -> AppResult<Uuid> {
        params
            .validate()
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;

        let branch = Some(params.branch.as_str()).filter(|b| !b.is_empty());
        let txn = self.begin().await?;

        let codebase =
            upsert_codebase_with(&txn, DEFAULT_HOST, &params.owner, &params.repo, branch).await?;

        let now = Utc::now();
        let id = Uuid::now_v7();
        let model = ActiveModel {
            id: Set(id),
            codebase_id: Set(codebase.id),
            commit_sha: Set(params.commit_sha.clone()),
            branch_name: Set(branch.map(str::to_string)),
            status: Set(AnalysisStatus::Running.as_str().to_string()),
            started_at: Set(now),
            completed_at: Set(None),
            error_message: Set(None),
            total_suites: Set(0),
            total_tests: Set(0),
            requested_by: Set(params.requested_by.clone()),
            created_at: Set(now),
        };

        model
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create analysis: {}", e)))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit analysis: {}", e)))?;

        debug!(analysis_id = %id, codebase_id = %codebase.id, "Analysis record created");
        Ok(id)
    }

    /// Write the suite forest and mark the analysis `completed` with its totals.
    pub async fn complete_analysis(&self, params: &SaveAnalysisInventoryParams) -> AppResult<()> {
        params
            .validate()
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;

        let txn = self.begin().await?;

        let (total_suites, total_tests) = {
            let mut sink = TransactionSink::new(&txn);
            write_inventory(&mut sink, params.analysis_id, &params.inventory).await?
        };

        let result = Analysis::update_many()
            .col_expr(
                analysis::Column::Status,
                Expr::value(AnalysisStatus::Completed.as_str()),
            )
            .col_expr(analysis::Column::TotalSuites, Expr::value(total_suites as i32))
            .col_expr(analysis::Column::TotalTests, Expr::value(total_tests as i32))
            .col_expr(analysis::Column::CompletedAt, Expr::value(Utc::now()))
            .filter(analysis::Column::Id.eq(params.analysis_id))
            .filter(analysis::Column::Status.eq(AnalysisStatus::Running.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to complete analysis: {}", e)))?;

        if result.rows_affected == 0 {
            return Err(transition_rejected(&txn, params.analysis_id).await);
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit inventory: {}", e)))?;

        info!(
            analysis_id = %params.analysis_id,
            total_suites,
            total_tests,
            "Analysis inventory saved"
        );
        Ok(())
    }

    /// Mark the analysis `failed`. The message is truncated to fit the column.
    pub async fn fail_analysis(&self, analysis_id: Uuid, error_message: &str) -> AppResult<()> {
        if analysis_id.is_nil() {
            return Err(AppError::InvalidInput("analysis ID is required".to_string()));
        }

        let txn = self.begin().await?;

        let result = Analysis::update_many()
            .col_expr(
                analysis::Column::Status,
                Expr::value(AnalysisStatus::Failed.as_str()),
            )
            .col_expr(
                analysis::Column::ErrorMessage,
                Expr::value(truncate_error_message(error_message)),
            )
            .col_expr(analysis::Column::CompletedAt, Expr::value(Utc::now()))
            .filter(analysis::Column::Id.eq(analysis_id))
            .filter(analysis::Column::Status.eq(AnalysisStatus::Running.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to record failure: {}", e)))?;

        if result.rows_affected == 0 {
            return Err(transition_rejected(&txn, analysis_id).await);
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit failure: {}", e)))?;

        Ok(())
    }

    /// Get an analysis by ID.
    pub async fn get_analysis(&self, id: Uuid) -> AppResult<Option<analysis::Model>> {
        let result = Analysis::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get analysis: {}", e)))?;

        Ok(result)
    }

    /// All suites of an analysis in insertion order.
    pub async fn get_suites_for_analysis(
        &self,
        analysis_id: Uuid,
    ) -> AppResult<Vec<test_suite::Model>> {
        let result = test_suite::Entity::find()
            .filter(test_suite::Column::AnalysisId.eq(analysis_id))
            .order_by_asc(test_suite::Column::Id) // UUIDv7 is time-ordered
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get suites: {}", e)))?;

        Ok(result)
    }

    /// Count test cases across all suites of an analysis.
    pub async fn count_cases_for_analysis(&self, analysis_id: Uuid) -> AppResult<u64> {
        let count = test_case::Entity::find()
            .inner_join(test_suite::Entity)
            .filter(test_suite::Column::AnalysisId.eq(analysis_id))
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count test cases: {}", e)))?;

        Ok(count)
    }

    /// Codebases due for a refresh, least recently handled first.
    pub async fn find_due_for_refresh(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<DueCodebase>> {
        let values: Vec<sea_orm::Value> = vec![cutoff.into(), (limit as i64).into()];

        let rows = DueRow::find_by_statement(Statement::from_sql_and_values(
            sea_orm::DatabaseBackend::Postgres,
            DUE_FOR_REFRESH_SQL,
            values,
        ))
        .all(self.connection())
        .await
        .map_err(|e| AppError::Database(format!("Failed to list due codebases: {}", e)))?;

        Ok(rows.into_iter().map(DueCodebase::from).collect())
    }
}

/// Explain why a guarded status update touched no rows.
async fn transition_rejected(txn: &DatabaseTransaction, analysis_id: Uuid) -> AppError {
    match Analysis::find_by_id(analysis_id).one(txn).await {
        Ok(Some(existing)) => AppError::Conflict(format!(
            "analysis {} is already {}",
            analysis_id, existing.status
        )),
        Ok(None) => AppError::NotFound(format!("Analysis {}", analysis_id)),
        Err(e) => AppError::Database(format!("Failed to load analysis: {}", e)),
    }
}

#[async_trait]
impl AnalysisRepository for DbPool {
    async fn create_analysis_record(
        &self,
        params: &CreateAnalysisRecordParams,
    ) -> AppResult<Uuid> {
        self.insert_running_analysis(params).await
    }

    async fn save_analysis_inventory(&self, params: &SaveAnalysisInventoryParams) -> AppResult<()> {
        self.complete_analysis(params).await
    }

    async fn record_failure(&self, analysis_id: Uuid, error_message: &str) -> AppResult<()> {
        self.fail_analysis(analysis_id, error_message).await
    }
}

#[async_trait]
impl RefreshRepository for DbPool {
    async fn list_due_for_refresh(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<DueCodebase>> {
        self.find_due_for_refresh(cutoff, limit).await
    }

    async fn mark_refresh_checked(&self, codebase_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        self.touch_refresh_check(codebase_id, at).await
    }
}
