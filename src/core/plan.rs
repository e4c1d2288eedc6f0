//! Plan construction and run-time plan state.
//!
//! A plan is one complete run of a goal through the task graph. The
//! planning collaborator hands the core a raw JSON plan; the core
//! validates it against a fixed contract, rejects cycles before any task
//! executes, and then owns the resulting [`TaskGraph`] inside a
//! [`PlanState`] until the goal reaches a terminal outcome.

use crate::contract::{describe_violations, Contract, FieldSpec, Shape};
use crate::core::graph::TaskGraph;
use crate::core::task::{Task, TaskError, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::FeedbackSink;
use crate::worker::{Capability, InvocationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The planning collaborator boundary.
///
/// Given a goal and optional constraints, returns a raw plan value that
/// the core validates before anything runs. How the plan is produced
/// (LLM, rules, a human) is outside the core.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        goal: &str,
        constraints: Option<&Value>,
    ) -> std::result::Result<Value, InvocationError>;
}

/// The fixed contract a raw plan must satisfy before deserialization.
pub fn plan_contract() -> Contract {
    Contract::new(vec![
        FieldSpec::required("tasks", Shape::Array).with_items(Shape::Object),
        FieldSpec::optional("dependencies", Shape::Array).with_items(Shape::Object),
    ])
}

/// One task as declared by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub capability: Capability,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Planner hint, preserved on the task but not used for selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// An explicit dependency edge: `from` must succeed before `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub from: String,
    pub to: String,
}

/// A validated plan as returned by the planning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl PlanSpec {
    /// Validate and deserialize a raw plan value.
    ///
    /// Contract violations and malformed task records are both reported
    /// as [`Error::PlanRejected`]; the goal never starts.
    pub fn parse(value: &Value) -> Result<Self> {
        let validation = plan_contract().validate(value);
        if !validation.is_valid() {
            return Err(Error::PlanRejected(describe_violations(
                validation.violations(),
            )));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::PlanRejected(e.to_string()))
    }

    /// Build the task graph, rejecting duplicates, unknown dependencies,
    /// and cycles.
    pub fn into_graph(self) -> Result<TaskGraph> {
        let tasks: Vec<Task> = self
            .tasks
            .into_iter()
            .map(|spec| {
                let mut task = Task::new(
                    TaskId::new(&spec.task_id),
                    spec.capability,
                    spec.payload,
                    spec.depends_on.iter().map(|d| TaskId::new(d)).collect(),
                );
                task.priority = spec.priority;
                task
            })
            .collect();
        let mut graph = TaskGraph::from_tasks(tasks)?;
        for edge in self.dependencies {
            graph.add_dependency(&TaskId::new(&edge.from), &TaskId::new(&edge.to))?;
        }
        Ok(graph)
    }
}

/// Terminal outcome of one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Every required task succeeded.
    Completed,
    /// At least one task failed or was cancelled.
    Aborted,
}

impl std::fmt::Display for PlanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanOutcome::Completed => write!(f, "completed"),
            PlanOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Terminal record for a single task in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Result of the surviving task, when it succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Structured failure record, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

/// The user-visible summary of a finished plan: every task's terminal
/// status, surviving results, and structured failure records, never a
/// raw unhandled fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan_id: PlanId,
    pub goal: String,
    pub outcome: PlanOutcome,
    /// Task records in topological order.
    pub tasks: Vec<TaskRecord>,
}

impl PlanReport {
    /// Ids of the tasks that ended permanently Failed.
    pub fn failed_task_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Failed { .. }))
            .map(|r| r.task_id.clone())
            .collect()
    }

    pub fn record_for(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|r| &r.task_id == id)
    }
}

/// Mutable run-time record of one goal execution.
///
/// Owns exactly one task graph and the append-only feedback log for the
/// lifetime of the goal. Exclusively owned by the dispatcher during a
/// run, which serializes all status transitions.
pub struct PlanState {
    pub id: PlanId,
    pub goal: String,
    graph: TaskGraph,
    feedback: FeedbackSink,
}

impl PlanState {
    pub fn new(goal: &str, graph: TaskGraph) -> Self {
        Self {
            id: PlanId::new(),
            goal: goal.to_string(),
            graph,
            feedback: FeedbackSink::new(),
        }
    }

    /// Ask the planning collaborator for a plan and construct the state.
    ///
    /// A malformed or cyclic plan aborts the goal here, before any task
    /// runs.
    pub async fn from_planner(
        planner: &dyn Planner,
        goal: &str,
        constraints: Option<&Value>,
    ) -> Result<Self> {
        let raw = planner
            .plan(goal, constraints)
            .await
            .map_err(|e| Error::Planner(e.to_string()))?;
        let spec = PlanSpec::parse(&raw)?;
        Ok(Self::new(goal, spec.into_graph()?))
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    pub fn feedback(&self) -> &FeedbackSink {
        &self.feedback
    }

    pub fn feedback_mut(&mut self) -> &mut FeedbackSink {
        &mut self.feedback
    }

    /// The plan outcome, or `None` while tasks are still non-terminal.
    pub fn outcome(&self) -> Option<PlanOutcome> {
        if !self.graph.is_complete() {
            return None;
        }
        if self.graph.all_succeeded() {
            Some(PlanOutcome::Completed)
        } else {
            Some(PlanOutcome::Aborted)
        }
    }

    /// Build the final report. Callable at any point; the outcome field
    /// reflects the current graph (`Aborted` while non-terminal tasks
    /// remain would be premature, so prefer calling this when complete).
    pub fn report(&self) -> Result<PlanReport> {
        let outcome = self.outcome().unwrap_or(PlanOutcome::Aborted);
        let tasks = self
            .graph
            .topological_order()?
            .into_iter()
            .map(|task| TaskRecord {
                task_id: task.id.clone(),
                status: task.status.clone(),
                attempts: task.attempt_count,
                result: task.result.clone(),
                error: task.terminal_error().cloned(),
            })
            .collect();
        Ok(PlanReport {
            plan_id: self.id,
            goal: self.goal.clone(),
            outcome,
            tasks,
        })
    }
}

impl std::fmt::Debug for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanState")
            .field("id", &self.id)
            .field("goal", &self.goal)
            .field("graph", &self.graph)
            .finish()
    }
}
