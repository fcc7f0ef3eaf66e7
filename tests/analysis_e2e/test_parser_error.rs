//! E2E tests: scanner failures.

use std::sync::atomic::Ordering;

use collector_lib::context::TaskContext;
use collector_lib::models::AnalysisStatus;
use collector_lib::queue::TaskHandler;

use super::test_helpers::*;

/// (4) Parser error: running -> failed, nothing committed.
#[tokio::test]
async fn test_parser_error_records_scan_failure() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Fails("syntax error in X"));

    let err = h
        .handler
        .process_task(&TaskContext::background(), &payload("octocat", "Hello-World", None))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "scan failed: syntax error in X");

    let analysis = h.store.only_analysis();
    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(
        analysis.error_message.as_deref(),
        Some("scan failed: syntax error in X")
    );
    assert!(h.store.suites().is_empty());
    assert_eq!(h.store.case_count(), 0);
    assert_eq!(h.vcs.closed.load(Ordering::SeqCst), 1);
}
