//! E2E tests against PostgreSQL. Ignored unless a database is available:
//!
//!   DATABASE_URL=postgres://... cargo test --test analysis_e2e -- --ignored

use std::sync::{Arc, OnceLock};

use chrono::{TimeDelta, Utc};
use collector_lib::config::DatabaseConfig;
use collector_lib::context::TaskContext;
use collector_lib::db::{AnalysisRepository, DbPool, RefreshRepository};
use collector_lib::error::AppError;
use collector_lib::models::{AnalysisStatus, AnalyzeRequest};
use collector_lib::services::{Analyzer, AnalyzerOptions};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use super::test_helpers::*;

static MIGRATIONS_RUN: OnceLock<()> = OnceLock::new();

async fn create_test_pool() -> DbPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = DbPool::new(&DatabaseConfig {
        url,
        max_connections: 2,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect to database");

    if MIGRATIONS_RUN.get().is_none() {
        pool.run_migrations().await.expect("Failed to run migrations");
        let _ = MIGRATIONS_RUN.set(());
    }
    pool
}

fn unique_owner(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::now_v7().simple().to_string()[20..])
}

fn analyzer_on(pool: &DbPool, parser: FakeParser) -> Analyzer {
    Analyzer::new(
        Arc::new(pool.clone()),
        Arc::new(FakeVcs::default()),
        Arc::new(parser),
        None,
        AnalyzerOptions::default(),
    )
}

/// Totals match the stored rows and the forest invariant holds.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_completed_analysis_matches_rows() {
    let pool = create_test_pool().await;
    let owner = unique_owner("pg");
    analyzer_on(&pool, FakeParser::Returns(Some(sample_inventory())))
        .execute(&TaskContext::background(), &AnalyzeRequest::new(&owner, "repo"))
        .await
        .unwrap();

    let codebase = pool
        .upsert_codebase("github.com", &owner, "repo", None)
        .await
        .unwrap();
    assert_eq!(codebase.default_branch.as_deref(), Some("main"));

    let due = pool
        .list_due_for_refresh(Utc::now() + TimeDelta::minutes(1), 1000)
        .await
        .unwrap();
    let entry = due
        .iter()
        .find(|d| d.codebase_id == codebase.id)
        .expect("completed analysis should be due after its cutoff");
    assert_eq!(entry.last_commit_sha, COMMIT_SHA);

    let analysis_id = {
        let params = collector_lib::models::CreateAnalysisRecordParams {
            branch: "main".to_string(),
            commit_sha: COMMIT_SHA.to_string(),
            owner: owner.clone(),
            repo: "repo".to_string(),
            requested_by: None,
        };
        pool.create_analysis_record(&params).await.unwrap()
    };
    pool.save_analysis_inventory(&collector_lib::models::SaveAnalysisInventoryParams {
        analysis_id,
        inventory: sample_inventory(),
    })
    .await
    .unwrap();

    let analysis = pool.get_analysis(analysis_id).await.unwrap().unwrap();
    assert_eq!(analysis.status, AnalysisStatus::Completed.as_str());
    let suites = pool.get_suites_for_analysis(analysis_id).await.unwrap();
    assert_eq!(analysis.total_suites as usize, suites.len());
    assert_eq!(
        analysis.total_tests as u64,
        pool.count_cases_for_analysis(analysis_id).await.unwrap()
    );
    for suite in &suites {
        assert_eq!(suite.depth == 0, suite.parent_id.is_none());
    }
}

/// Terminal states never change, and stored errors are truncated.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_failure_is_terminal_and_truncated() {
    let pool = create_test_pool().await;
    let owner = unique_owner("pg-fail");
    let analysis_id = pool
        .create_analysis_record(&collector_lib::models::CreateAnalysisRecordParams {
            branch: "main".to_string(),
            commit_sha: COMMIT_SHA.to_string(),
            owner,
            repo: "repo".to_string(),
            requested_by: Some("U1".to_string()),
        })
        .await
        .unwrap();

    assert_ok!(pool.record_failure(analysis_id, &"e".repeat(5000)).await);
    let analysis = pool.get_analysis(analysis_id).await.unwrap().unwrap();
    let message = analysis.error_message.unwrap();
    assert_eq!(analysis.status, AnalysisStatus::Failed.as_str());
    assert_eq!(message.chars().count(), 1000);
    assert!(message.ends_with("... (truncated)"));
    assert_eq!(analysis.requested_by.as_deref(), Some("U1"));

    let err = assert_err!(pool.record_failure(analysis_id, "again").await);
    assert!(matches!(err, AppError::Conflict(_)), "{err}");
    assert_err!(
        pool.save_analysis_inventory(&collector_lib::models::SaveAnalysisInventoryParams {
            analysis_id,
            inventory: sample_inventory(),
        })
        .await
    );
    assert!(pool.get_suites_for_analysis(analysis_id).await.unwrap().is_empty());
}

/// Upserting twice keeps one row with the latest branch.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_upsert_codebase_is_idempotent() {
    let pool = create_test_pool().await;
    let owner = unique_owner("pg-upsert");

    let first = pool
        .upsert_codebase("github.com", &owner, "repo", Some("main"))
        .await
        .unwrap();
    let second = pool
        .upsert_codebase("github.com", &owner, "repo", Some("trunk"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.default_branch.as_deref(), Some("trunk"));

    let kept = pool
        .upsert_codebase("github.com", &owner, "repo", None)
        .await
        .unwrap();
    assert_eq!(kept.default_branch.as_deref(), Some("trunk"));
}

/// Stored tokens are decrypted; missing accounts mean anonymous access.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_oauth_token_store_round_trip() {
    use collector_lib::entity::oauth_account;
    use collector_lib::services::{OAuthTokenStore, TokenCipher, TokenLookup, TokenLookupError};
    use sea_orm::{ActiveModelTrait, Set};
    use secrecy::ExposeSecret;

    let pool = create_test_pool().await;
    let cipher = TokenCipher::from_bytes(&[7u8; 32]).unwrap();
    let user_id = Uuid::now_v7();
    let now = Utc::now();

    oauth_account::ActiveModel {
        id: Set(Uuid::now_v7()),
        user_id: Set(user_id),
        provider: Set("github".to_string()),
        provider_user_id: Set(unique_owner("gh")),
        access_token: Set(Some(cipher.encrypt("ghp_stored").unwrap())),
        scope: Set(Some("repo".to_string())),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool.connection())
    .await
    .unwrap();

    let store = OAuthTokenStore::new(pool.clone(), cipher);

    let token = assert_ok!(store.get_oauth_token(&user_id.to_string(), "github").await);
    assert_eq!(token.expose_secret(), "ghp_stored");

    let missing = store
        .get_oauth_token(&Uuid::now_v7().to_string(), "github")
        .await;
    assert!(matches!(missing, Err(TokenLookupError::NotFound)));

    let malformed = store.get_oauth_token("not-a-uuid", "github").await;
    assert!(matches!(
        malformed,
        Err(TokenLookupError::Failed(AppError::InvalidInput(_)))
    ));
}

fn record_params(owner: &str) -> collector_lib::models::CreateAnalysisRecordParams {
    collector_lib::models::CreateAnalysisRecordParams {
        branch: "main".to_string(),
        commit_sha: COMMIT_SHA.to_string(),
        owner: owner.to_string(),
        repo: "repo".to_string(),
        requested_by: None,
    }
}

async fn completed_analysis(pool: &DbPool, owner: &str) -> Uuid {
    let analysis_id = pool.create_analysis_record(&record_params(owner)).await.unwrap();
    pool.save_analysis_inventory(&collector_lib::models::SaveAnalysisInventoryParams {
        analysis_id,
        inventory: sample_inventory(),
    })
    .await
    .unwrap();
    analysis_id
}

async fn failed_analysis(pool: &DbPool, owner: &str) -> Uuid {
    let analysis_id = pool.create_analysis_record(&record_params(owner)).await.unwrap();
    pool.record_failure(analysis_id, "clone failed: connection reset")
        .await
        .unwrap();
    analysis_id
}

/// Move every timestamp of an analysis `days` into the past.
async fn backdate(pool: &DbPool, analysis_id: Uuid, days: i64) {
    use collector_lib::entity::analysis;
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    let at = Utc::now() - TimeDelta::days(days);
    analysis::Entity::update_many()
        .col_expr(analysis::Column::StartedAt, Expr::value(at))
        .col_expr(analysis::Column::CreatedAt, Expr::value(at))
        .col_expr(analysis::Column::CompletedAt, Expr::value(at))
        .filter(analysis::Column::Id.eq(analysis_id))
        .exec(pool.connection())
        .await
        .unwrap();
}

async fn due_ids(pool: &DbPool) -> Vec<Uuid> {
    pool.list_due_for_refresh(Utc::now() - TimeDelta::days(1), 10_000)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.codebase_id)
        .collect()
}

async fn codebase_id(pool: &DbPool, owner: &str) -> Uuid {
    pool.upsert_codebase("github.com", owner, "repo", None)
        .await
        .unwrap()
        .id
}

/// An old failed refresh leaves the codebase due; a recent one defers it.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_failed_refresh_does_not_disable_auto_refresh() {
    let pool = create_test_pool().await;

    let flaky = unique_owner("pg-flaky");
    let completed = completed_analysis(&pool, &flaky).await;
    backdate(&pool, completed, 30).await;
    let failed = failed_analysis(&pool, &flaky).await;
    backdate(&pool, failed, 29).await;

    let retried = unique_owner("pg-retried");
    let completed = completed_analysis(&pool, &retried).await;
    backdate(&pool, completed, 30).await;
    failed_analysis(&pool, &retried).await;

    let flaky_id = codebase_id(&pool, &flaky).await;
    let retried_id = codebase_id(&pool, &retried).await;

    let due = pool
        .list_due_for_refresh(Utc::now() - TimeDelta::days(1), 10_000)
        .await
        .unwrap();
    let entry = due
        .iter()
        .find(|d| d.codebase_id == flaky_id)
        .expect("codebase with an old failed refresh should be due");
    assert_eq!(entry.last_commit_sha, COMMIT_SHA);
    assert!(!due.iter().any(|d| d.codebase_id == retried_id));
}

/// A checked codebase leaves the due list and sorts behind unchecked ones.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_refresh_check_moves_codebase_back() {
    let pool = create_test_pool().await;

    let stable = unique_owner("pg-stable");
    let analysis = completed_analysis(&pool, &stable).await;
    backdate(&pool, analysis, 3).await;
    let changed = unique_owner("pg-changed");
    let analysis = completed_analysis(&pool, &changed).await;
    backdate(&pool, analysis, 2).await;

    let stable_id = codebase_id(&pool, &stable).await;
    let changed_id = codebase_id(&pool, &changed).await;

    let before = due_ids(&pool).await;
    let stable_pos = before.iter().position(|id| *id == stable_id).unwrap();
    let changed_pos = before.iter().position(|id| *id == changed_id).unwrap();
    assert!(stable_pos < changed_pos);

    assert_ok!(pool.mark_refresh_checked(stable_id, Utc::now()).await);
    let after = due_ids(&pool).await;
    assert!(!after.contains(&stable_id));
    assert!(after.contains(&changed_id));

    let err = assert_err!(pool.mark_refresh_checked(Uuid::now_v7(), Utc::now()).await);
    assert!(matches!(err, AppError::NotFound(_)), "{err}");
}

/// Branch and framework values longer than the old column limits are stored.
#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn test_long_branch_and_framework_are_stored() {
    let pool = create_test_pool().await;
    let owner = unique_owner("pg-long");
    let branch = format!("feature/{}", "b".repeat(400));

    let analysis_id = assert_ok!(
        pool.create_analysis_record(&collector_lib::models::CreateAnalysisRecordParams {
            branch: branch.clone(),
            ..record_params(&owner)
        })
        .await
    );

    let mut inventory = sample_inventory();
    inventory.files[0].framework = "f".repeat(300);
    assert_ok!(
        pool.save_analysis_inventory(&collector_lib::models::SaveAnalysisInventoryParams {
            analysis_id,
            inventory,
        })
        .await
    );

    let analysis = pool.get_analysis(analysis_id).await.unwrap().unwrap();
    assert_eq!(analysis.branch_name.as_deref(), Some(branch.as_str()));
    let suites = pool.get_suites_for_analysis(analysis_id).await.unwrap();
    assert!(suites.iter().any(|s| s.framework.as_deref().map(str::len) == Some(300)));
}
