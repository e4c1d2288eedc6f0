//! In-flight limits and goal cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use conductor::core::{PlanOutcome, TaskErrorKind, TaskId, TaskStatus};
use conductor::orchestration::{Dispatcher, DispatcherConfig};
use conductor::worker::{BackoffKind, RetryPolicy, Worker};

use crate::fixtures::{descriptor, plan_state, registry_with, MockWorker};

fn parallel_tasks(n: usize, capability: &str) -> serde_json::Value {
    let tasks: Vec<_> = (0..n)
        .map(|i| json!({"task_id": format!("t{}", i), "capability": capability, "payload": {}}))
        .collect();
    json!({ "tasks": tasks })
}

#[tokio::test]
async fn test_per_worker_concurrency_limit_is_respected() {
    let worker = Arc::new(MockWorker::new().with_delay(Duration::from_millis(10)));
    let registry = registry_with(vec![(
        descriptor("serial", &["summarize_text"]).with_concurrency_limit(1),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry).with_config(DispatcherConfig {
        max_in_flight: 8,
        selection_retry: Duration::from_millis(5),
    });

    let mut plan = plan_state("goal", &parallel_tasks(4, "summarize_text"));
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    assert_eq!(worker.call_count(), 4);
    assert_eq!(worker.max_observed(), 1);
}

#[tokio::test]
async fn test_global_in_flight_ceiling_is_respected() {
    let worker = Arc::new(MockWorker::new().with_delay(Duration::from_millis(10)));
    let registry = registry_with(vec![(
        descriptor("wide", &["summarize_text"]).with_concurrency_limit(16),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry).with_config(DispatcherConfig {
        max_in_flight: 2,
        selection_retry: Duration::from_millis(5),
    });

    let mut plan = plan_state("goal", &parallel_tasks(6, "summarize_text"));
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    assert_eq!(worker.call_count(), 6);
    assert!(worker.max_observed() <= 2);
}

#[tokio::test]
async fn test_load_spreads_across_equal_workers() {
    let first = Arc::new(MockWorker::new().with_delay(Duration::from_millis(10)));
    let second = Arc::new(MockWorker::new().with_delay(Duration::from_millis(10)));
    let registry = registry_with(vec![
        (
            descriptor("w1", &["summarize_text"]).with_concurrency_limit(4),
            first.clone() as Arc<dyn Worker>,
        ),
        (
            descriptor("w2", &["summarize_text"]).with_concurrency_limit(4),
            second.clone() as Arc<dyn Worker>,
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry).with_config(DispatcherConfig {
        max_in_flight: 8,
        selection_retry: Duration::from_millis(5),
    });

    let mut plan = plan_state("goal", &parallel_tasks(2, "summarize_text"));
    dispatcher.run(&mut plan).await.unwrap();

    // Equal priority: the in-flight tiebreak sends the second task to the
    // idle worker instead of stacking both on the first.
    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 1);
}

/// Cancellation stops new selection while in-flight attempts run to
/// completion and keep their results.
#[tokio::test]
async fn test_cancellation_drains_in_flight_and_cancels_idle() {
    let worker = Arc::new(MockWorker::new().with_delay(Duration::from_millis(50)));
    let registry = registry_with(vec![(
        descriptor("slow", &["summarize_text"]).with_concurrency_limit(4),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);
    let token = dispatcher.cancellation_token();

    let raw = json!({
        "tasks": [
            {"task_id": "running_a", "capability": "summarize_text", "payload": {}},
            {"task_id": "running_b", "capability": "summarize_text", "payload": {}},
            {"task_id": "downstream", "capability": "summarize_text",
             "payload": {}, "depends_on": ["running_a"]},
        ],
    });
    let mut plan = plan_state("goal", &raw);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Aborted);
    // Both in-flight attempts were allowed to finish and succeed.
    for id in ["running_a", "running_b"] {
        let record = report.record_for(&TaskId::new(id)).unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
    }
    // The not-yet-started dependent was cancelled, never invoked.
    let downstream = report.record_for(&TaskId::new("downstream")).unwrap();
    assert!(matches!(downstream.status, TaskStatus::Cancelled { .. }));
    assert_eq!(
        downstream.error.as_ref().unwrap().kind,
        TaskErrorKind::GoalCancelled
    );
    assert_eq!(worker.call_count(), 2);
}

/// A task waiting out a backoff delay is cancelled rather than retried.
#[tokio::test]
async fn test_cancellation_aborts_pending_retry() {
    let worker = Arc::new(MockWorker::new().failing_first(usize::MAX));
    let registry = registry_with(vec![(
        descriptor("flaky", &["summarize_text"]).with_retry_policy(RetryPolicy {
            max_retries: 5,
            backoff: BackoffKind::Fixed,
            base_delay: Duration::from_millis(200),
        }),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);
    let token = dispatcher.cancellation_token();

    let raw = json!({
        "tasks": [{"task_id": "t1", "capability": "summarize_text", "payload": {}}],
    });
    let mut plan = plan_state("goal", &raw);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Aborted);
    let record = report.record_for(&TaskId::new("t1")).unwrap();
    assert!(matches!(record.status, TaskStatus::Cancelled { .. }));
    assert_eq!(
        record.error.as_ref().unwrap().kind,
        TaskErrorKind::GoalCancelled
    );
    // Only the first attempt ran; the backoff wait was cancelled.
    assert_eq!(worker.call_count(), 1);
}
