//! E2E tests: the process-wide clone bound.

use std::sync::Arc;
use std::time::Duration;

use collector_lib::context::TaskContext;
use collector_lib::models::AnalyzeRequest;
use collector_lib::services::AnalyzerOptions;
use std::sync::atomic::Ordering;

use super::test_helpers::*;

/// Never more than `max_concurrent_clones` clones at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clones_are_bounded() {
    let h = Arc::new(Harness::build(
        FakeVcs::slow(Duration::from_millis(30)),
        FakeParser::Returns(None),
        None,
        AnalyzerOptions::default(),
    ));
    assert_eq!(h.analyzer.options().max_concurrent_clones, 2);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.analyzer
                .execute(
                    &TaskContext::background(),
                    &AnalyzeRequest::new("octocat", format!("repo-{i}")),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.vcs.calls().len(), 8);
    let peak = h.vcs.max_active.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrent clones: {peak}");
    assert_eq!(h.store.analyses().len(), 8);
}
