//! Migration: Create oauth_accounts table.
//!
//! Written by the account service; the worker only reads it. Tokens are
//! stored AES-256-GCM encrypted.

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
                CREATE TABLE IF NOT EXISTS oauth_accounts (
                    id UUID PRIMARY KEY,
                    user_id UUID NOT NULL,
                    provider VARCHAR(32) NOT NULL,
                    provider_user_id VARCHAR(255) NOT NULL,
                    access_token TEXT,
                    scope TEXT,

                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_oauth_accounts_user_provider
                    ON oauth_accounts(user_id, provider);

                CREATE OR REPLACE TRIGGER update_oauth_accounts_updated_at
                    BEFORE UPDATE ON oauth_accounts
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
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
                DROP TRIGGER IF EXISTS update_oauth_accounts_updated_at ON oauth_accounts;
                DROP TABLE IF EXISTS oauth_accounts CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
