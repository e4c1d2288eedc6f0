//! Bounded retry semantics and per-task backoff.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use conductor::core::{PlanOutcome, TaskErrorKind, TaskId};
use conductor::orchestration::{Dispatcher, FeedbackOutcome};
use conductor::worker::{BackoffKind, RetryPolicy, Worker};

use crate::fixtures::{descriptor, fast_retry, plan_state, registry_with, MockWorker};

fn single_task() -> serde_json::Value {
    json!({
        "tasks": [{"task_id": "t1", "capability": "summarize_text", "payload": {}}],
    })
}

/// max_retries = 2 allows three attempts in total: two scripted failures
/// then success on the third.
#[tokio::test]
async fn test_two_failures_then_success_within_budget() {
    let worker = Arc::new(MockWorker::new().failing_first(2));
    let registry = registry_with(vec![(
        descriptor("flaky", &["summarize_text"]).with_retry_policy(fast_retry(2)),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("goal", &single_task());
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    let record = report.record_for(&TaskId::new("t1")).unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(worker.call_count(), 3);
    // Only the terminal outcome is recorded, not the retried attempts.
    assert_eq!(plan.feedback().len(), 1);
    assert_eq!(plan.feedback().entries()[0].outcome, FeedbackOutcome::Succeeded);
}

#[tokio::test]
async fn test_budget_exhaustion_fails_with_last_error() {
    let worker = Arc::new(MockWorker::new().failing_first(usize::MAX));
    let registry = registry_with(vec![(
        descriptor("flaky", &["summarize_text"]).with_retry_policy(fast_retry(2)),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("goal", &single_task());
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Aborted);
    let record = report.record_for(&TaskId::new("t1")).unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(worker.call_count(), 3);
    assert_eq!(
        record.error.as_ref().unwrap().kind,
        TaskErrorKind::InvocationError
    );
}

#[tokio::test]
async fn test_zero_retries_means_single_attempt() {
    let worker = Arc::new(MockWorker::new().failing_first(usize::MAX));
    let registry = registry_with(vec![(
        descriptor("flaky", &["summarize_text"]).with_retry_policy(RetryPolicy::none()),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("goal", &single_task());
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(worker.call_count(), 1);
    assert_eq!(report.record_for(&TaskId::new("t1")).unwrap().attempts, 1);
}

/// One task sitting out a backoff delay must not block dispatch of an
/// independent ready task.
#[tokio::test]
async fn test_backoff_does_not_block_other_tasks() {
    let flaky = Arc::new(MockWorker::new().failing_first(1));
    let steady = Arc::new(MockWorker::new());
    let registry = registry_with(vec![
        (
            descriptor("flaky", &["summarize_text"]).with_retry_policy(RetryPolicy {
                max_retries: 1,
                backoff: BackoffKind::Fixed,
                base_delay: Duration::from_millis(100),
            }),
            flaky.clone() as Arc<dyn Worker>,
        ),
        (
            descriptor("steady", &["archive_results"]),
            steady.clone() as Arc<dyn Worker>,
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let raw = json!({
        "tasks": [
            {"task_id": "retried", "capability": "summarize_text", "payload": {}},
            {"task_id": "independent", "capability": "archive_results", "payload": {}},
        ],
    });
    let mut plan = plan_state("goal", &raw);
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    // The independent task finished while the retried one waited out its
    // 100ms backoff, so its feedback entry comes first.
    let entries = plan.feedback().entries();
    assert_eq!(entries[0].task_id, TaskId::new("independent"));
    assert_eq!(entries[1].task_id, TaskId::new("retried"));
}

#[tokio::test]
async fn test_attempts_are_strictly_sequential() {
    // A worker with a generous concurrency limit still never sees two
    // attempts of the same task at once.
    let worker = Arc::new(
        MockWorker::new()
            .failing_first(2)
            .with_delay(Duration::from_millis(5)),
    );
    let registry = registry_with(vec![(
        descriptor("flaky", &["summarize_text"])
            .with_concurrency_limit(8)
            .with_retry_policy(fast_retry(2)),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("goal", &single_task());
    dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(worker.call_count(), 3);
    assert_eq!(worker.max_observed(), 1);
}
