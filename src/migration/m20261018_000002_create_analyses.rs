//! Migration: Create analyses table.
//!
//! One row per pipeline run against a codebase at a commit.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE analyses (
                    id UUID PRIMARY KEY, -- UUIDv7 for time-ordered sorting
                    codebase_id UUID NOT NULL REFERENCES codebases(id) ON DELETE CASCADE,

                    commit_sha VARCHAR(64) NOT NULL CHECK (commit_sha <> ''),
                    branch_name VARCHAR(255),

                    -- running -> completed | failed, terminal states never change
                    status VARCHAR(20) NOT NULL DEFAULT 'running'
                        CHECK (status IN ('running', 'completed', 'failed')),

                    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    completed_at TIMESTAMPTZ,
                    error_message VARCHAR(1000),

                    total_suites INTEGER NOT NULL DEFAULT 0,
                    total_tests INTEGER NOT NULL DEFAULT 0,

                    -- User whose OAuth token was requested for this run
                    requested_by VARCHAR(64),

                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX idx_analyses_codebase_id ON analyses(codebase_id, created_at DESC);

                -- Refresh scans look for the latest completed run per codebase
                CREATE INDEX idx_analyses_completed ON analyses(completed_at)
                    WHERE status = 'completed';
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS analyses CASCADE;")
            .await?;

        Ok(())
    }
}
