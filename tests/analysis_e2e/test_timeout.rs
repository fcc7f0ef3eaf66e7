//! E2E tests: the per-analysis deadline.

use std::time::Duration;

use collector_lib::context::TaskContext;
use collector_lib::models::{AnalysisStatus, AnalyzeRequest};
use collector_lib::services::{AnalyzerOptions, ErrorKind};
use tokio_util::sync::CancellationToken;

use super::test_helpers::*;

fn short_deadline() -> AnalyzerOptions {
    AnalyzerOptions {
        analysis_timeout: Duration::from_millis(10),
        ..AnalyzerOptions::default()
    }
}

/// (5) Deadline during clone: clone failed, nothing to record.
#[tokio::test]
async fn test_deadline_during_clone() {
    let h = Harness::build(
        FakeVcs::slow(Duration::from_millis(500)),
        FakeParser::Returns(None),
        None,
        short_deadline(),
    );

    let err = h
        .analyzer
        .execute(&TaskContext::background(), &AnalyzeRequest::new("octocat", "Hello-World"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CloneFailed);
    assert_eq!(err.to_string(), "clone failed: context deadline exceeded");
    assert!(h.store.analyses().is_empty());
}

/// (5) Deadline during scan: the failure still lands on the analysis.
#[tokio::test]
async fn test_deadline_during_scan_is_recorded() {
    let h = Harness::build(FakeVcs::default(), FakeParser::Hangs, None, short_deadline());

    let err = h
        .analyzer
        .execute(&TaskContext::background(), &AnalyzeRequest::new("octocat", "Hello-World"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScanFailed);
    let analysis = h.store.only_analysis();
    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(
        analysis.error_message.as_deref(),
        Some("scan failed: context deadline exceeded")
    );
}

/// Worker shutdown cancels the task; the analysis is marked failed.
#[tokio::test]
async fn test_cancellation_is_recorded_as_failure() {
    let h = Harness::new(FakeVcs::default(), FakeParser::Hangs);
    let token = CancellationToken::new();
    let ctx = TaskContext::with_cancel(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = h
        .analyzer
        .execute(&ctx, &AnalyzeRequest::new("octocat", "Hello-World"))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.to_string(), "scan failed: context canceled");
    assert_eq!(h.store.only_analysis().status, AnalysisStatus::Failed);
}
