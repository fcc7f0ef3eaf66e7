//! Migration: Store git and scanner supplied strings as TEXT.
//!
//! Branch names and framework labels come from outside and have no useful
//! upper bound; an oversized value must not fail the whole save.

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
                ALTER TABLE codebases ALTER COLUMN default_branch TYPE TEXT;
                ALTER TABLE analyses ALTER COLUMN branch_name TYPE TEXT;
                ALTER TABLE analyses ALTER COLUMN requested_by TYPE TEXT;
                ALTER TABLE test_suites ALTER COLUMN framework TYPE TEXT;
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
                ALTER TABLE test_suites ALTER COLUMN framework TYPE VARCHAR(100) USING LEFT(framework, 100);
                ALTER TABLE analyses ALTER COLUMN requested_by TYPE VARCHAR(64) USING LEFT(requested_by, 64);
                ALTER TABLE analyses ALTER COLUMN branch_name TYPE VARCHAR(255) USING LEFT(branch_name, 255);
                ALTER TABLE codebases ALTER COLUMN default_branch TYPE VARCHAR(255) USING LEFT(default_branch, 255);
                "#,
            )
            .await?;

        Ok(())
    }
}
