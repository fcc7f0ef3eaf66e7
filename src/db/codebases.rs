//! Database queries for codebases.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, QueryFilter, Statement};
use uuid::Uuid;

use crate::entity::codebase::{self, Entity as CodebaseEntity};
use crate::error::{AppError, AppResult};
use crate::models::Codebase;

use super::DbPool;

#[derive(Debug, FromQueryResult)]
struct CodebaseRow {
    id: Uuid,
    host: String,
    owner: String,
    name: String,
    default_branch: Option<String>,
}

impl From<CodebaseRow> for Codebase {
    fn from(row: CodebaseRow) -> Self {
        Codebase {
            id: row.id,
            host: row.host,
            owner: row.owner,
            name: row.name,
            default_branch: row.default_branch,
        }
    }
}

const UPSERT_CODEBASE_SQL: &str = r#"
    INSERT INTO codebases (id, host, owner, name, default_branch)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (host, owner, name) DO UPDATE
        SET default_branch = COALESCE(EXCLUDED.default_branch, codebases.default_branch)
    RETURNING id, host, owner, name, default_branch
"#;

/// Upsert on `(host, owner, name)` using any connection or open transaction.
/// A `None` branch keeps the stored default branch.
pub(crate) async fn upsert_codebase_with<C: ConnectionTrait>(
    conn: &C,
    host: &str,
    owner: &str,
    name: &str,
    default_branch: Option<&str>,
) -> AppResult<Codebase> {
    let values: Vec<sea_orm::Value> = vec![
        Uuid::now_v7().into(),
        host.to_string().into(),
        owner.to_string().into(),
        name.to_string().into(),
        default_branch
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .into(),
    ];

    let row = CodebaseRow::find_by_statement(Statement::from_sql_and_values(
        sea_orm::DatabaseBackend::Postgres,
        UPSERT_CODEBASE_SQL,
        values,
    ))
    .one(conn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to upsert codebase: {}", e)))?
    .ok_or_else(|| AppError::Database("Upsert codebase returned no row".to_string()))?;

    Ok(row.into())
}

impl DbPool {
    /// Insert or refresh a codebase identity.
    pub async fn upsert_codebase(
        &self,
        host: &str,
        owner: &str,
        name: &str,
        default_branch: Option<&str>,
    ) -> AppResult<Codebase> {
        upsert_codebase_with(self.connection(), host, owner, name, default_branch).await
    }

    /// Get a codebase by ID.
    pub async fn get_codebase(&self, id: Uuid) -> AppResult<Option<Codebase>> {
        let result = CodebaseEntity::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get codebase: {}", e)))?;

        Ok(result.map(Codebase::from))
    }

    /// Record that the scheduler handled `codebase_id` at `at`.
    pub async fn touch_refresh_check(&self, codebase_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let result = CodebaseEntity::update_many()
            .col_expr(codebase::Column::LastRefreshCheckedAt, Expr::value(at))
            .filter(codebase::Column::Id.eq(codebase_id))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to record refresh check: {}", e)))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Codebase {}", codebase_id)));
        }
        Ok(())
    }
}
