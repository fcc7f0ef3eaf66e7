//! Migration: Track when the scheduler last handled a codebase.
//!
//! Set when a refresh is enqueued or skipped for an unchanged HEAD, so the
//! codebase moves to the back of the due list either way.

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
                ALTER TABLE codebases ADD COLUMN IF NOT EXISTS last_refresh_checked_at TIMESTAMPTZ;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                ALTER TABLE codebases DROP COLUMN IF EXISTS last_refresh_checked_at;
                "#,
            )
            .await?;

        Ok(())
    }
}
