//! Task data model for the execution graph.
//!
//! Tasks are the atomic units of work routed to workers by capability.
//! Each task tracks its status, attempt count, result, and failure record.

use crate::worker::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a task within one plan.
///
/// Ids originate in the planning collaborator's output (`"t1"`,
/// `"fetch"`) and are immutable for the task's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Structured error kind attached to terminal task failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Payload violates the selected worker's input contract. Never retried.
    InvalidInput,
    /// Worker result violates its output contract. Counts toward retries.
    InvalidOutput,
    /// No registered worker matches the capability. Permanent.
    NoEligibleWorker,
    /// Worker invocation exceeded its timeout. Retryable.
    InvocationTimeout,
    /// Worker invocation returned an error. Retryable.
    InvocationError,
    /// Cancellation cascaded from a failed dependency.
    UpstreamFailure,
    /// The whole goal was cancelled.
    GoalCancelled,
}

impl TaskErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::InvalidInput => "invalid_input",
            TaskErrorKind::InvalidOutput => "invalid_output",
            TaskErrorKind::NoEligibleWorker => "no_eligible_worker",
            TaskErrorKind::InvocationTimeout => "invocation_timeout",
            TaskErrorKind::InvocationError => "invocation_error",
            TaskErrorKind::UpstreamFailure => "upstream_failure",
            TaskErrorKind::GoalCancelled => "goal_cancelled",
        }
    }

    /// Whether an attempt failing with this kind may consume retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskErrorKind::InvalidOutput
                | TaskErrorKind::InvocationTimeout
                | TaskErrorKind::InvocationError
        )
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured task failure: error kind plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Task status in its lifecycle.
///
/// Statuses only move forward: Pending → Ready → Running →
/// {Succeeded | Failed}, with retry re-entering Ready from Running and
/// Cancelled reachable from any non-terminal status. Terminal statuses
/// are immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Created, dependencies not yet satisfied.
    Pending,
    /// All dependencies succeeded; eligible for dispatch.
    Ready,
    /// An attempt is in flight.
    Running,
    /// Terminal: the task produced a validated result.
    Succeeded,
    /// Terminal: retries exhausted or a permanent error occurred.
    Failed { error: TaskError },
    /// Terminal: cancelled before completion.
    Cancelled { reason: TaskError },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Cancelled { .. }
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

/// A single task in the execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, immutable.
    pub id: TaskId,
    /// Required capability used for worker selection.
    pub capability: Capability,
    /// Structured input; validated against the selected worker's input
    /// contract at dispatch.
    pub payload: Value,
    /// Tasks that must succeed before this one may run.
    pub depends_on: Vec<TaskId>,
    pub status: TaskStatus,
    /// Number of invocation attempts started so far.
    pub attempt_count: u32,
    /// Most recent attempt failure, kept across retries.
    pub last_error: Option<TaskError>,
    /// Validated result of the successful attempt.
    pub result: Option<Value>,
    /// Planner-supplied priority hint, preserved but not used for
    /// selection (worker priority drives scoring).
    pub priority: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, capability: Capability, payload: Value, depends_on: Vec<TaskId>) -> Self {
        Self {
            id,
            capability,
            payload,
            depends_on,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            result: None,
            priority: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The failure record for terminal Failed/Cancelled tasks.
    pub fn terminal_error(&self) -> Option<&TaskError> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            TaskStatus::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }
}
