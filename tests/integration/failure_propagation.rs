//! Upstream failure cascades and partial-result behavior.

use std::sync::Arc;

use serde_json::json;

use conductor::core::{PlanOutcome, TaskErrorKind, TaskId, TaskStatus};
use conductor::contract::{Contract, FieldSpec, Shape};
use conductor::orchestration::{Dispatcher, FeedbackOutcome};
use conductor::worker::{RetryPolicy, Worker};

use crate::fixtures::{descriptor, fast_retry, pipeline_plan, plan_state, registry_with, MockWorker};

/// fetch fails permanently; summarize and report are cancelled upstream,
/// while the independent archive branch still runs to success.
#[tokio::test]
async fn test_upstream_failure_cancels_dependents_only() {
    let registry = registry_with(vec![
        (
            descriptor("retriever", &["retrieve_documents"])
                .with_retry_policy(RetryPolicy::none()),
            Arc::new(MockWorker::new().failing_first(usize::MAX)) as Arc<dyn Worker>,
        ),
        (
            descriptor("summarizer", &["summarize_text"]),
            Arc::new(MockWorker::new()),
        ),
        (
            descriptor("reporter", &["generate_report"]),
            Arc::new(MockWorker::new()),
        ),
        (
            descriptor("archiver", &["archive_results"]),
            Arc::new(MockWorker::new()),
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("doomed pipeline", &pipeline_plan());
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Aborted);

    let fetch = report.record_for(&TaskId::new("fetch")).unwrap();
    assert!(matches!(fetch.status, TaskStatus::Failed { .. }));
    assert_eq!(
        fetch.error.as_ref().unwrap().kind,
        TaskErrorKind::InvocationError
    );

    for id in ["summarize", "report"] {
        let record = report.record_for(&TaskId::new(id)).unwrap();
        assert!(matches!(record.status, TaskStatus::Cancelled { .. }));
        assert_eq!(
            record.error.as_ref().unwrap().kind,
            TaskErrorKind::UpstreamFailure
        );
        assert_eq!(record.attempts, 0);
    }

    // Partial-failure semantics: the independent branch is untouched.
    let archive = report.record_for(&TaskId::new("archive")).unwrap();
    assert_eq!(archive.status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_cascade_is_recorded_in_feedback() {
    let registry = registry_with(vec![
        (
            descriptor("retriever", &["retrieve_documents"])
                .with_retry_policy(RetryPolicy::none()),
            Arc::new(MockWorker::new().failing_first(usize::MAX)) as Arc<dyn Worker>,
        ),
        (
            descriptor("archiver", &["archive_results"]),
            Arc::new(MockWorker::new()),
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let raw = json!({
        "tasks": [
            {"task_id": "fetch", "capability": "retrieve_documents", "payload": {}},
            {"task_id": "store", "capability": "archive_results",
             "payload": {}, "depends_on": ["fetch"]},
        ],
    });
    let mut plan = plan_state("goal", &raw);
    dispatcher.run(&mut plan).await.unwrap();

    let entries = plan.feedback_mut().drain();
    assert_eq!(entries.len(), 2);
    assert!(matches!(entries[0].outcome, FeedbackOutcome::Failed { .. }));
    assert_eq!(entries[0].task_id, TaskId::new("fetch"));
    assert!(matches!(
        &entries[1].outcome,
        FeedbackOutcome::Cancelled { reason } if reason.kind == TaskErrorKind::UpstreamFailure
    ));
    assert_eq!(entries[1].task_id, TaskId::new("store"));
}

/// A mid-pipeline capability with no registered worker fails that task
/// permanently without touching what already succeeded.
#[tokio::test]
async fn test_unroutable_middle_task_preserves_upstream_results() {
    let registry = registry_with(vec![
        (
            descriptor("retriever", &["retrieve_documents"]),
            Arc::new(MockWorker::new().with_response(json!({"documents": []})))
                as Arc<dyn Worker>,
        ),
        // No worker registered for summarize_text.
        (
            descriptor("reporter", &["generate_report"]),
            Arc::new(MockWorker::new()),
        ),
        (
            descriptor("archiver", &["archive_results"]),
            Arc::new(MockWorker::new()),
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let mut plan = plan_state("goal", &pipeline_plan());
    let report = dispatcher.run(&mut plan).await.unwrap();

    assert_eq!(report.outcome, PlanOutcome::Aborted);
    assert_eq!(
        report.record_for(&TaskId::new("fetch")).unwrap().status,
        TaskStatus::Succeeded
    );

    let summarize = report.record_for(&TaskId::new("summarize")).unwrap();
    assert_eq!(
        summarize.error.as_ref().unwrap().kind,
        TaskErrorKind::NoEligibleWorker
    );
    assert_eq!(summarize.attempts, 0);

    let downstream = report.record_for(&TaskId::new("report")).unwrap();
    assert!(matches!(downstream.status, TaskStatus::Cancelled { .. }));
}

/// An input contract violation fails the task before any invocation and
/// cascades like any other permanent failure.
#[tokio::test]
async fn test_invalid_input_cascades_without_attempts() {
    let worker = Arc::new(MockWorker::new());
    let registry = registry_with(vec![
        (
            descriptor("retriever", &["retrieve_documents"]).with_input_contract(Contract::new(
                vec![FieldSpec::required("query", Shape::String)],
            )),
            worker.clone() as Arc<dyn Worker>,
        ),
        (
            descriptor("archiver", &["archive_results"]),
            Arc::new(MockWorker::new()),
        ),
    ])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let raw = json!({
        "tasks": [
            // Missing the required "query" field.
            {"task_id": "fetch", "capability": "retrieve_documents", "payload": {"q": 1}},
            {"task_id": "store", "capability": "archive_results",
             "payload": {}, "depends_on": ["fetch"]},
        ],
    });
    let mut plan = plan_state("goal", &raw);
    let report = dispatcher.run(&mut plan).await.unwrap();

    let fetch = report.record_for(&TaskId::new("fetch")).unwrap();
    assert_eq!(
        fetch.error.as_ref().unwrap().kind,
        TaskErrorKind::InvalidInput
    );
    assert_eq!(fetch.attempts, 0);
    assert_eq!(worker.call_count(), 0);

    let store = report.record_for(&TaskId::new("store")).unwrap();
    assert!(matches!(store.status, TaskStatus::Cancelled { .. }));
}

/// Output contract violations consume the retry budget, then fail.
#[tokio::test]
async fn test_persistent_output_violation_exhausts_retries() {
    let worker = Arc::new(MockWorker::new().with_response(json!({"wrong": "shape"})));
    let registry = registry_with(vec![(
        descriptor("summarizer", &["summarize_text"])
            .with_output_contract(Contract::new(vec![FieldSpec::required(
                "summary",
                Shape::String,
            )]))
            .with_retry_policy(fast_retry(2)),
        worker.clone() as Arc<dyn Worker>,
    )])
    .await;
    let dispatcher = Dispatcher::new(registry);

    let raw = json!({
        "tasks": [{"task_id": "t1", "capability": "summarize_text", "payload": {}}],
    });
    let mut plan = plan_state("goal", &raw);
    let report = dispatcher.run(&mut plan).await.unwrap();

    let record = report.record_for(&TaskId::new("t1")).unwrap();
    assert_eq!(
        record.error.as_ref().unwrap().kind,
        TaskErrorKind::InvalidOutput
    );
    assert_eq!(record.attempts, 3);
    assert_eq!(worker.call_count(), 3);
}
