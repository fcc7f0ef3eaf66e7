//! Persisting a scanned inventory as a suite forest.
//!
//! The walk is written against [`InventorySink`] so the same ordering rules
//! apply to the database transaction and to in-memory sinks:
//!
//! - files in inventory order, each contributing roots at depth 0
//! - depth-first pre-order: a suite, then its tests, then its nested suites
//! - file-level tests go into an implicit suite after the file's declared suites
//!
//! Names are truncated here, at write time only.

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, Set};
use uuid::Uuid;

use crate::entity::{test_case, test_suite};
use crate::error::{AppError, AppResult};
use crate::models::{Inventory, TestCaseStatus, TestFile, TestSuite};

pub const MAX_SUITE_NAME_LENGTH: usize = 500;
pub const MAX_TEST_NAME_LENGTH: usize = 2000;
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 1000;

const NAME_TRUNCATION_SUFFIX: &str = "...";
const ERROR_TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Truncate to at most `max` characters, the suffix included.
fn truncate_with_suffix(s: &str, max: usize, suffix: &str) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(suffix.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

pub fn truncate_suite_name(name: &str) -> String {
    truncate_with_suffix(name, MAX_SUITE_NAME_LENGTH, NAME_TRUNCATION_SUFFIX)
}

pub fn truncate_test_name(name: &str) -> String {
    truncate_with_suffix(name, MAX_TEST_NAME_LENGTH, NAME_TRUNCATION_SUFFIX)
}

pub fn truncate_error_message(message: &str) -> String {
    truncate_with_suffix(message, MAX_ERROR_MESSAGE_LENGTH, ERROR_TRUNCATION_SUFFIX)
}

fn clamp_line(line: i32) -> i32 {
    line.max(1)
}

/// A suite row ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSuite {
    pub analysis_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub file_path: String,
    pub line_number: i32,
    pub framework: Option<String>,
    pub depth: i32,
}

/// A test case row ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCase {
    pub suite_id: Uuid,
    pub name: String,
    pub line_number: i32,
    pub status: TestCaseStatus,
}

/// Destination for inventory rows.
#[async_trait]
pub trait InventorySink: Send {
    async fn insert_suite(&mut self, suite: NewSuite) -> AppResult<Uuid>;
    async fn insert_case(&mut self, case: NewCase) -> AppResult<()>;
}

/// Walk `inventory` into `sink`, returning `(total_suites, total_tests)`.
pub async fn write_inventory<S: InventorySink + ?Sized>(
    sink: &mut S,
    analysis_id: Uuid,
    inventory: &Inventory,
) -> AppResult<(usize, usize)> {
    let mut total_suites = 0;
    let mut total_tests = 0;

    for file in &inventory.files {
        let (suites, tests) = write_file(sink, analysis_id, file).await.map_err(|e| {
            AppError::Database(format!("Failed to save test file {}: {}", file.path, e))
        })?;
        total_suites += suites;
        total_tests += tests;
    }

    Ok((total_suites, total_tests))
}

async fn write_file<S: InventorySink + ?Sized>(
    sink: &mut S,
    analysis_id: Uuid,
    file: &TestFile,
) -> AppResult<(usize, usize)> {
    let framework = Some(file.framework.clone()).filter(|f| !f.is_empty());
    let mut suites = 0;
    let mut tests = 0;

    // (suite, parent, depth); children are pushed reversed so they pop in order
    let mut stack: Vec<(&TestSuite, Option<Uuid>, i32)> =
        file.suites.iter().rev().map(|s| (s, None, 0)).collect();

    while let Some((suite, parent_id, depth)) = stack.pop() {
        let suite_id = sink
            .insert_suite(NewSuite {
                analysis_id,
                parent_id,
                name: truncate_suite_name(&suite.name),
                file_path: file.path.clone(),
                line_number: clamp_line(suite.location.start_line),
                framework: framework.clone(),
                depth,
            })
            .await?;
        suites += 1;

        for test in &suite.tests {
            sink.insert_case(NewCase {
                suite_id,
                name: truncate_test_name(&test.name),
                line_number: clamp_line(test.location.start_line),
                status: test.status.into(),
            })
            .await?;
            tests += 1;
        }

        stack.extend(
            suite
                .suites
                .iter()
                .rev()
                .map(|nested| (nested, Some(suite_id), depth + 1)),
        );
    }

    if !file.tests.is_empty() {
        let implicit_id = sink
            .insert_suite(NewSuite {
                analysis_id,
                parent_id: None,
                name: truncate_suite_name(&file.path),
                file_path: file.path.clone(),
                line_number: 1,
                framework,
                depth: 0,
            })
            .await?;
        suites += 1;

        for test in &file.tests {
            sink.insert_case(NewCase {
                suite_id: implicit_id,
                name: truncate_test_name(&test.name),
                line_number: clamp_line(test.location.start_line),
                status: test.status.into(),
            })
            .await?;
            tests += 1;
        }
    }

    Ok((suites, tests))
}

/// Inserts rows inside an open transaction.
pub struct TransactionSink<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> TransactionSink<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl InventorySink for TransactionSink<'_> {
    async fn insert_suite(&mut self, suite: NewSuite) -> AppResult<Uuid> {
        let id = Uuid::now_v7();
        let line = suite.line_number;
        let model = test_suite::ActiveModel {
            id: Set(id),
            analysis_id: Set(suite.analysis_id),
            parent_id: Set(suite.parent_id),
            name: Set(suite.name),
            file_path: Set(suite.file_path),
            line_number: Set(suite.line_number),
            framework: Set(suite.framework),
            depth: Set(suite.depth),
        };

        model.insert(self.txn).await.map_err(|e| {
            AppError::Database(format!("Failed to create suite at line {}: {}", line, e))
        })?;

        Ok(id)
    }

    async fn insert_case(&mut self, case: NewCase) -> AppResult<()> {
        let line = case.line_number;
        let model = test_case::ActiveModel {
            id: Set(Uuid::now_v7()),
            suite_id: Set(case.suite_id),
            name: Set(case.name),
            line_number: Set(case.line_number),
            status: Set(case.status.as_str().to_string()),
            tags: Set(serde_json::json!([])),
        };

        model.insert(self.txn).await.map_err(|e| {
            AppError::Database(format!("Failed to create test case at line {}: {}", line, e))
        })?;

        Ok(())
    }
}
