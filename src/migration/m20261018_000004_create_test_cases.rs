//! Migration: Create test_cases table.

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
                CREATE TABLE test_cases (
                    id UUID PRIMARY KEY, -- UUIDv7 keeps insertion order
                    suite_id UUID NOT NULL REFERENCES test_suites(id) ON DELETE CASCADE,

                    name VARCHAR(2000) NOT NULL,
                    line_number INTEGER NOT NULL DEFAULT 1 CHECK (line_number >= 1),
                    status VARCHAR(20) NOT NULL DEFAULT 'active'
                        CHECK (status IN ('active', 'skipped', 'todo')),
                    tags JSONB NOT NULL DEFAULT '[]'::jsonb
                );

                CREATE INDEX idx_test_cases_suite_id ON test_cases(suite_id);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS test_cases CASCADE;")
            .await?;

        Ok(())
    }
}
