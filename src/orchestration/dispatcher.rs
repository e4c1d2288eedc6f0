//! The dispatch loop: selection, validation, invocation, completion.
//!
//! The dispatcher exclusively owns a plan's graph for the duration of a
//! run. Worker invocations execute on spawned tasks and report back over
//! an internal channel, so every status transition happens on the loop
//! itself and no transition can race another. Backoff waits are per-task
//! timers: one task sitting out a retry delay never blocks dispatch of
//! unrelated ready tasks.

use crate::contract::describe_violations;
use crate::core::plan::{PlanOutcome, PlanReport, PlanState, Planner};
use crate::core::task::{TaskError, TaskErrorKind, TaskId, TaskStatus};
use crate::error::Result;
use crate::orchestration::feedback::FeedbackOutcome;
use crate::orchestration::registry::{CapabilityRegistry, RegisteredWorker};
use crate::orchestration::selector::{Selection, WorkerSelector};
use crate::worker::{Capability, WorkerId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Global ceiling on simultaneous in-flight invocations across all
    /// workers.
    pub max_in_flight: usize,
    /// How long to wait before re-running selection when ready tasks are
    /// stalled on saturated workers.
    pub selection_retry: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            selection_retry: Duration::from_millis(100),
        }
    }
}

/// Progress notifications emitted during a run.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    TaskStarted {
        task_id: TaskId,
        worker_id: WorkerId,
        attempt: u32,
    },
    TaskSucceeded {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskRetrying {
        task_id: TaskId,
        error: TaskError,
        delay: Duration,
    },
    TaskFailed {
        task_id: TaskId,
        error: TaskError,
    },
    TaskCancelled {
        task_id: TaskId,
        reason: TaskError,
    },
    PlanFinished {
        outcome: PlanOutcome,
    },
}

/// Messages from spawned attempt tasks back to the dispatch loop.
enum AttemptMessage {
    Finished {
        task_id: TaskId,
        worker_id: WorkerId,
        outcome: AttemptOutcome,
    },
    /// A per-task backoff timer elapsed; the task may be selected again.
    RetryDue { task_id: TaskId },
}

enum AttemptOutcome {
    Output(Value),
    TimedOut(Duration),
    Error(String),
}

/// Drives plans to completion against a worker registry.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    selector: WorkerSelector,
    config: DispatcherConfig,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<DispatcherEvent>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            selector: WorkerSelector::new(),
            config: DispatcherConfig::default(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to progress events.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<DispatcherEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that cancels the running goal. No new attempts start after
    /// cancellation; in-flight attempts run to their own timeout.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Plan a goal and run it to a terminal report.
    pub async fn run_goal(
        &self,
        planner: &dyn Planner,
        goal: &str,
        constraints: Option<&Value>,
    ) -> Result<PlanReport> {
        let mut plan = PlanState::from_planner(planner, goal, constraints).await?;
        self.run(&mut plan).await
    }

    /// Drive the plan until every task is terminal, then report.
    pub async fn run(&self, plan: &mut PlanState) -> Result<PlanReport> {
        info!(plan = %plan.id, goal = %plan.goal, "starting plan run");
        let (tx, mut rx) = mpsc::unbounded_channel::<AttemptMessage>();

        let mut run = RunState::default();
        let mut cancelled = false;

        loop {
            let stalled = if cancelled {
                false
            } else {
                self.dispatch_ready(plan, &tx, &mut run).await?
            };

            if plan.graph().is_complete()
                && run.total_in_flight == 0
                && run.waiting_retry.is_empty()
            {
                break;
            }

            tokio::select! {
                message = rx.recv() => {
                    if let Some(message) = message {
                        self.handle_message(plan, &tx, &mut run, cancelled, message)?;
                    }
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.handle_cancellation(plan, &mut run)?;
                }
                _ = tokio::time::sleep(self.config.selection_retry), if stalled => {}
            }
        }

        let report = plan.report()?;
        info!(plan = %plan.id, outcome = %report.outcome, "plan run finished");
        self.emit(DispatcherEvent::PlanFinished {
            outcome: report.outcome,
        });
        Ok(report)
    }

    /// One selection pass over the ready set. Returns `true` when ready
    /// tasks remain undispatched (saturation or the global ceiling), so
    /// the loop schedules a re-poll.
    async fn dispatch_ready(
        &self,
        plan: &mut PlanState,
        tx: &mpsc::UnboundedSender<AttemptMessage>,
        run: &mut RunState,
    ) -> Result<bool> {
        let mut stalled = false;
        let ready = plan.graph_mut().ready_tasks();
        for task_id in ready {
            if run.waiting_retry.contains(&task_id) {
                continue;
            }
            if run.total_in_flight >= self.config.max_in_flight {
                stalled = true;
                break;
            }
            // A failure cascade earlier in this pass may have cancelled
            // tasks that were ready when the snapshot was taken.
            let (capability, payload) = match plan.graph().get(&task_id) {
                Some(task) if task.status == TaskStatus::Ready => {
                    (task.capability.clone(), task.payload.clone())
                }
                _ => continue,
            };

            let candidates = self.registry.find_by_capability(&capability).await;
            match self.selector.select(&capability, &candidates, &run.in_flight) {
                Selection::NoCapability => {
                    let error = TaskError::new(
                        TaskErrorKind::NoEligibleWorker,
                        format!("no registered worker advertises {}", capability),
                    );
                    self.fail_task(plan, &task_id, error)?;
                }
                Selection::Saturated => {
                    debug!(task = %task_id, capability = %capability, "all eligible workers saturated");
                    stalled = true;
                }
                Selection::Selected(worker) => {
                    self.start_attempt(plan, tx, run, &task_id, capability, payload, worker)?;
                }
            }
        }
        Ok(stalled)
    }

    /// Validate the input and launch one invocation attempt.
    #[allow(clippy::too_many_arguments)]
    fn start_attempt(
        &self,
        plan: &mut PlanState,
        tx: &mpsc::UnboundedSender<AttemptMessage>,
        run: &mut RunState,
        task_id: &TaskId,
        capability: Capability,
        payload: Value,
        worker: Arc<RegisteredWorker>,
    ) -> Result<()> {
        let merged = merge_defaults(&payload, &worker.descriptor.defaults);
        let validation = worker.descriptor.input_contract.validate(&merged);
        if !validation.is_valid() {
            // Input violations fail the task before any attempt starts;
            // the payload will not change, so retrying is pointless.
            let error = TaskError::new(
                TaskErrorKind::InvalidInput,
                describe_violations(validation.violations()),
            );
            self.fail_task(plan, task_id, error)?;
            return Ok(());
        }

        plan.graph_mut().mark_running(task_id)?;
        let attempt = plan
            .graph()
            .get(task_id)
            .map(|t| t.attempt_count)
            .unwrap_or(0);
        let worker_id = worker.descriptor.id.clone();
        *run.in_flight.entry(worker_id.clone()).or_insert(0) += 1;
        run.total_in_flight += 1;
        run.attempts.insert(task_id.clone(), Arc::clone(&worker));

        debug!(task = %task_id, worker = %worker_id, attempt, "dispatching attempt");
        self.emit(DispatcherEvent::TaskStarted {
            task_id: task_id.clone(),
            worker_id: worker_id.clone(),
            attempt,
        });

        let timeout = worker.descriptor.timeout;
        let tx = tx.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let outcome =
                match tokio::time::timeout(timeout, worker.invoker.invoke(&capability, merged))
                    .await
                {
                    Ok(Ok(value)) => AttemptOutcome::Output(value),
                    Ok(Err(error)) => AttemptOutcome::Error(error.to_string()),
                    Err(_) => AttemptOutcome::TimedOut(timeout),
                };
            let _ = tx.send(AttemptMessage::Finished {
                task_id,
                worker_id,
                outcome,
            });
        });
        Ok(())
    }

    fn handle_message(
        &self,
        plan: &mut PlanState,
        tx: &mpsc::UnboundedSender<AttemptMessage>,
        run: &mut RunState,
        cancelled: bool,
        message: AttemptMessage,
    ) -> Result<()> {
        match message {
            AttemptMessage::Finished {
                task_id,
                worker_id,
                outcome,
            } => {
                run.total_in_flight = run.total_in_flight.saturating_sub(1);
                if let Some(count) = run.in_flight.get_mut(&worker_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        run.in_flight.remove(&worker_id);
                    }
                }
                let worker = match run.attempts.remove(&task_id) {
                    Some(worker) => worker,
                    None => return Ok(()),
                };
                self.finish_attempt(plan, tx, run, cancelled, &task_id, &worker_id, worker, outcome)
            }
            AttemptMessage::RetryDue { task_id } => {
                run.waiting_retry.remove(&task_id);
                if cancelled {
                    self.cancel_task(plan, &task_id, goal_cancelled())?;
                }
                Ok(())
            }
        }
    }

    /// Fold one finished attempt back into the graph.
    #[allow(clippy::too_many_arguments)]
    fn finish_attempt(
        &self,
        plan: &mut PlanState,
        tx: &mpsc::UnboundedSender<AttemptMessage>,
        run: &mut RunState,
        cancelled: bool,
        task_id: &TaskId,
        worker_id: &WorkerId,
        worker: Arc<RegisteredWorker>,
        outcome: AttemptOutcome,
    ) -> Result<()> {
        let error = match outcome {
            AttemptOutcome::Output(value) => {
                let validation = worker.descriptor.output_contract.validate(&value);
                if validation.is_valid() {
                    plan.graph_mut().mark_succeeded(task_id, value)?;
                    plan.feedback_mut()
                        .record(task_id.clone(), FeedbackOutcome::Succeeded);
                    info!(task = %task_id, worker = %worker_id, "task succeeded");
                    self.emit(DispatcherEvent::TaskSucceeded {
                        task_id: task_id.clone(),
                        worker_id: worker_id.clone(),
                    });
                    return Ok(());
                }
                TaskError::new(
                    TaskErrorKind::InvalidOutput,
                    describe_violations(validation.violations()),
                )
            }
            AttemptOutcome::TimedOut(timeout) => TaskError::new(
                TaskErrorKind::InvocationTimeout,
                format!("no result within {}ms", timeout.as_millis()),
            ),
            AttemptOutcome::Error(message) => {
                TaskError::new(TaskErrorKind::InvocationError, message)
            }
        };

        if cancelled {
            // The goal is being torn down; failures of in-flight attempts
            // are not retried.
            return self.cancel_task(plan, task_id, goal_cancelled());
        }

        let attempt_count = plan
            .graph()
            .get(task_id)
            .map(|t| t.attempt_count)
            .unwrap_or(0);
        let policy = &worker.descriptor.retry_policy;
        if error.kind.is_retryable() && attempt_count <= policy.max_retries {
            let delay = policy.delay_for(attempt_count);
            warn!(
                task = %task_id,
                worker = %worker_id,
                attempt = attempt_count,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            plan.graph_mut().requeue(task_id, error.clone())?;
            run.waiting_retry.insert(task_id.clone());
            self.emit(DispatcherEvent::TaskRetrying {
                task_id: task_id.clone(),
                error,
                delay,
            });
            let tx = tx.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(AttemptMessage::RetryDue { task_id });
            });
        } else {
            self.fail_task(plan, task_id, error)?;
        }
        Ok(())
    }

    /// Permanent failure: mark the task Failed and fold the upstream
    /// cancellation cascade into the feedback log.
    fn fail_task(&self, plan: &mut PlanState, task_id: &TaskId, error: TaskError) -> Result<()> {
        warn!(task = %task_id, error = %error, "task failed permanently");
        let cascaded = plan.graph_mut().mark_failed(task_id, error.clone())?;
        plan.feedback_mut().record(
            task_id.clone(),
            FeedbackOutcome::Failed {
                error: error.clone(),
            },
        );
        self.emit(DispatcherEvent::TaskFailed {
            task_id: task_id.clone(),
            error,
        });
        for dependent in cascaded {
            let reason = plan
                .graph()
                .get(&dependent)
                .and_then(|t| t.terminal_error().cloned())
                .unwrap_or_else(|| {
                    TaskError::new(TaskErrorKind::UpstreamFailure, "dependency failed")
                });
            debug!(task = %dependent, "cancelled by upstream failure");
            plan.feedback_mut().record(
                dependent.clone(),
                FeedbackOutcome::Cancelled {
                    reason: reason.clone(),
                },
            );
            self.emit(DispatcherEvent::TaskCancelled {
                task_id: dependent,
                reason,
            });
        }
        Ok(())
    }

    fn cancel_task(&self, plan: &mut PlanState, task_id: &TaskId, reason: TaskError) -> Result<()> {
        if plan.graph_mut().cancel(task_id, reason.clone())? {
            plan.feedback_mut().record(
                task_id.clone(),
                FeedbackOutcome::Cancelled {
                    reason: reason.clone(),
                },
            );
            self.emit(DispatcherEvent::TaskCancelled {
                task_id: task_id.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Goal cancellation: stop selecting, cancel everything idle, and let
    /// in-flight attempts resolve on their own timeouts.
    fn handle_cancellation(&self, plan: &mut PlanState, run: &mut RunState) -> Result<()> {
        info!(plan = %plan.id, "goal cancelled, draining in-flight attempts");
        let reason = goal_cancelled();
        let waiting: Vec<TaskId> = run.waiting_retry.drain().collect();
        for task_id in waiting {
            self.cancel_task(plan, &task_id, reason.clone())?;
        }
        let idle = plan.graph_mut().cancel_idle(&reason);
        for task_id in idle {
            plan.feedback_mut().record(
                task_id.clone(),
                FeedbackOutcome::Cancelled {
                    reason: reason.clone(),
                },
            );
            self.emit(DispatcherEvent::TaskCancelled {
                task_id,
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn emit(&self, event: DispatcherEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Loop-local bookkeeping for one plan run.
#[derive(Default)]
struct RunState {
    /// In-flight invocation count per worker.
    in_flight: HashMap<WorkerId, usize>,
    total_in_flight: usize,
    /// Registration handle per running attempt. Holding the `Arc` keeps
    /// the output contract and retry policy stable even if the worker is
    /// unregistered mid-attempt.
    attempts: HashMap<TaskId, Arc<RegisteredWorker>>,
    /// Tasks sitting out a backoff delay; excluded from selection until
    /// their timer fires.
    waiting_retry: HashSet<TaskId>,
}

fn goal_cancelled() -> TaskError {
    TaskError::new(TaskErrorKind::GoalCancelled, "goal cancelled")
}

/// Merge worker defaults into an object payload: explicit task fields
/// always win, defaults only fill gaps. Non-object payloads pass through.
fn merge_defaults(payload: &Value, defaults: &serde_json::Map<String, Value>) -> Value {
    if defaults.is_empty() {
        return payload.clone();
    }
    match payload {
        Value::Object(fields) => {
            let mut merged = defaults.clone();
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        other => other.clone(),
    }
}
