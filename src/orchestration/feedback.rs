//! Append-only feedback log for task outcomes.
//!
//! The sink is a durable, ordered record of what happened during a plan
//! run, consumed by the external persistence/memory collaborator. It
//! performs no scoring logic itself. Reviewer/system feedback enters
//! through the same interface as task outcomes: a note is just another
//! producer, not a privileged channel.

use crate::core::task::{TaskError, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a task, as recorded in the feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FeedbackOutcome {
    Succeeded,
    Failed { error: TaskError },
    Cancelled { reason: TaskError },
    /// Human or system review feedback attached to a task.
    Note { source: String, note: String },
}

/// One entry in the append-only feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub task_id: TaskId,
    pub outcome: FeedbackOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only outcome log.
///
/// `drain` hands out entries recorded since the previous drain without
/// rewriting history: the full log stays intact for the lifetime of the
/// plan.
#[derive(Debug, Default)]
pub struct FeedbackSink {
    entries: Vec<FeedbackEntry>,
    drained: usize,
}

impl FeedbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome for a task.
    pub fn record(&mut self, task_id: TaskId, outcome: FeedbackOutcome) {
        self.entries.push(FeedbackEntry {
            task_id,
            outcome,
            timestamp: Utc::now(),
        });
    }

    /// Entries recorded since the last drain, in record order.
    pub fn drain(&mut self) -> Vec<FeedbackEntry> {
        let fresh = self.entries[self.drained..].to_vec();
        self.drained = self.entries.len();
        fresh
    }

    /// The complete history, including already-drained entries.
    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
