//! E2E tests: successful analyses.

use std::sync::atomic::Ordering;

use collector_lib::context::TaskContext;
use collector_lib::models::{AnalysisStatus, AnalyzeRequest};
use collector_lib::queue::TaskHandler;

use super::test_helpers::*;

/// (1) Public repository: running -> completed with totals and commit.
#[tokio::test]
async fn test_public_repo_completes() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Returns(Some(sample_inventory())));

    h.handler
        .process_task(&TaskContext::background(), &payload("octocat", "Hello-World", None))
        .await
        .unwrap();

    let analysis = h.store.only_analysis();
    assert_eq!(analysis.status, AnalysisStatus::Completed);
    assert_eq!(analysis.commit_sha, COMMIT_SHA);
    assert_eq!(analysis.branch, "main");
    assert!(analysis.error_message.is_none());
    assert_eq!(analysis.total_suites, 3);
    assert_eq!(analysis.total_tests, 4);
    assert_eq!(h.store.suites().len(), analysis.total_suites);
    assert_eq!(h.store.case_count(), analysis.total_tests);

    let calls = h.vcs.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "https://github.com/octocat/Hello-World");
    assert_eq!(calls[0].token, None);
    assert_eq!(h.vcs.closed.load(Ordering::SeqCst), 1);
}

/// Suites are stored depth-first with parents before children.
#[tokio::test]
async fn test_suite_forest_shape() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Returns(Some(sample_inventory())));
    h.analyzer
        .execute(
            &TaskContext::background(),
            &AnalyzeRequest::new("octocat", "Hello-World"),
        )
        .await
        .unwrap();

    let suites = h.store.suites();
    let names: Vec<&str> = suites.iter().map(|(_, s)| s.name.as_str()).collect();
    assert_eq!(names, vec!["math", "add", "tests/smoke_test.go"]);

    for (_, suite) in &suites {
        assert_eq!(suite.depth == 0, suite.parent_id.is_none(), "suite {}", suite.name);
    }
    assert_eq!(suites[1].1.parent_id, Some(suites[0].0));
    assert_eq!(suites[1].1.depth, 1);
    assert_eq!(suites[0].1.framework.as_deref(), Some("jest"));
    assert_eq!(suites[2].1.line_number, 1);

    let analysis = h.store.only_analysis();
    assert_eq!(analysis.total_tests, 4);
}

/// A scan with no document completes with zero totals.
#[tokio::test]
async fn test_empty_scan_completes_with_zero_totals() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Returns(None));

    h.handler
        .process_task(&TaskContext::background(), &payload("octocat", "empty", None))
        .await
        .unwrap();

    let analysis = h.store.only_analysis();
    assert_eq!(analysis.status, AnalysisStatus::Completed);
    assert_eq!((analysis.total_suites, analysis.total_tests), (0, 0));
}

/// The same repository twice yields two analyses and one codebase.
#[tokio::test]
async fn test_repeat_requests_are_not_deduplicated() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Returns(Some(sample_inventory())));
    let ctx = TaskContext::background();

    for _ in 0..2 {
        h.handler
            .process_task(&ctx, &payload("octocat", "Hello-World", None))
            .await
            .unwrap();
    }

    assert_eq!(h.store.analyses().len(), 2);
    assert_eq!(h.store.codebase_count(), 1);
}

/// A store failure during save is reported and recorded.
#[tokio::test]
async fn test_save_failure_marks_analysis_failed() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Returns(Some(sample_inventory())));
    h.store.fail_saves.store(true, Ordering::SeqCst);

    let err = h
        .handler
        .process_task(&TaskContext::background(), &payload("octocat", "Hello-World", None))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("save failed"), "{err}");

    let analysis = h.store.only_analysis();
    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert!(analysis.error_message.unwrap().starts_with("save failed"));
    assert_eq!(h.store.suites().len(), 0);
}
