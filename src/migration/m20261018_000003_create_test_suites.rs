//! Migration: Create test_suites table.
//!
//! The suite forest of an analysis. Roots have depth 0 and no parent.

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
                CREATE TABLE test_suites (
                    id UUID PRIMARY KEY, -- UUIDv7 keeps insertion order
                    analysis_id UUID NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
                    parent_id UUID REFERENCES test_suites(id) ON DELETE CASCADE,

                    name VARCHAR(500) NOT NULL,
                    file_path TEXT NOT NULL,
                    line_number INTEGER NOT NULL DEFAULT 1 CHECK (line_number >= 1),
                    framework VARCHAR(100),
                    depth INTEGER NOT NULL DEFAULT 0 CHECK (depth >= 0),

                    CONSTRAINT chk_test_suites_root_depth
                        CHECK ((parent_id IS NULL) = (depth = 0))
                );

                CREATE INDEX idx_test_suites_analysis_id ON test_suites(analysis_id);
                CREATE INDEX idx_test_suites_parent_id ON test_suites(parent_id)
                    WHERE parent_id IS NOT NULL;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS test_suites CASCADE;")
            .await?;

        Ok(())
    }
}
