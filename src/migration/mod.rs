//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20261018_000001_create_codebases;
mod m20261018_000002_create_analyses;
mod m20261018_000003_create_test_suites;
mod m20261018_000004_create_test_cases;
mod m20261018_000005_create_oauth_accounts;
mod m20261018_000006_widen_external_text_columns;
mod m20261018_000007_add_codebase_refresh_check;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_create_codebases::Migration),
            Box::new(m20261018_000002_create_analyses::Migration),
            Box::new(m20261018_000003_create_test_suites::Migration),
            Box::new(m20261018_000004_create_test_cases::Migration),
            Box::new(m20261018_000005_create_oauth_accounts::Migration),
            Box::new(m20261018_000006_widen_external_text_columns::Migration),
            Box::new(m20261018_000007_add_codebase_refresh_check::Migration),
        ]
    }
}
