//! Dependency-ordered task graph for one goal execution.
//!
//! The graph owns the tasks and their dependency edges, rejects cyclic
//! input at construction, and is the single gatekeeper for task status
//! transitions: statuses only move forward, terminal statuses are
//! idempotent sinks, and a failure cascades cancellation to every task
//! that transitively depends on the failed one.

use crate::core::task::{Task, TaskError, TaskErrorKind, TaskId, TaskStatus};
use crate::error::{Error, Result};
use chrono::Utc;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The task dependency graph.
///
/// Edges point from a dependency to its dependent: an edge `a -> b`
/// means `a` must succeed before `b` may run.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build a graph from tasks whose `depends_on` sets name each other.
    ///
    /// # Errors
    /// Returns `DuplicateTask` for repeated ids, `UnknownDependency` for
    /// edges to tasks not in the set, and `CyclicGraph` if the
    /// dependencies contain a cycle. A rejected graph never runs.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }
        // Edges are added after all nodes exist so forward references work.
        let edges: Vec<(TaskId, TaskId)> = graph
            .graph
            .node_weights()
            .flat_map(|task| {
                task.depends_on
                    .iter()
                    .map(|dep| (dep.clone(), task.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (from, to) in edges {
            graph.add_dependency(&from, &to)?;
        }
        Ok(graph)
    }

    /// Add a task in Pending status.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::DuplicateTask(task.id.to_string()));
        }
        let id = task.id.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        Ok(())
    }

    /// Add a dependency edge: `from` must succeed before `to` may run.
    ///
    /// Validates that the edge does not introduce a cycle; cyclic input
    /// is rejected, never silently broken.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = *self.task_index.get(from).ok_or(Error::UnknownDependency {
            task: to.to_string(),
            dependency: from.to_string(),
        })?;
        let to_index = *self.task_index.get(to).ok_or(Error::UnknownDependency {
            task: to.to_string(),
            dependency: from.to_string(),
        })?;

        // Add the edge tentatively, then check for a cycle.
        let edge = self.graph.add_edge(from_index, to_index, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::CyclicGraph(format!(
                "dependency from {} to {} would create a cycle",
                from, to
            )));
        }

        // Keep the task's own dependency list consistent with the edges.
        if let Some(task) = self.graph.node_weight_mut(to_index) {
            if !task.depends_on.contains(from) {
                task.depends_on.push(from.clone());
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        let index = *self
            .task_index
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        self.graph
            .node_weight_mut(index)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Ids of the tasks the given task directly depends on.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Incoming)
    }

    /// Ids of the tasks that directly depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, direction: petgraph::Direction) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .map(|t| t.id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    // ========== Readiness ==========

    /// Recompute readiness and return every Ready task id.
    ///
    /// Pending tasks whose dependencies have all succeeded are promoted
    /// to Ready atomically here; the promotion and the returned snapshot
    /// happen under one `&mut` borrow, so two sibling completions can
    /// never double-promote a shared dependent.
    pub fn ready_tasks(&mut self) -> Vec<TaskId> {
        let mut ready = Vec::new();
        for index in self.graph.node_indices().collect::<Vec<_>>() {
            let status = match self.graph.node_weight(index) {
                Some(task) => task.status.clone(),
                None => continue,
            };
            match status {
                TaskStatus::Ready => {
                    if let Some(task) = self.graph.node_weight(index) {
                        ready.push(task.id.clone());
                    }
                }
                TaskStatus::Pending => {
                    let deps_succeeded = self
                        .graph
                        .neighbors_directed(index, petgraph::Direction::Incoming)
                        .all(|dep| {
                            self.graph
                                .node_weight(dep)
                                .map(|t| t.status == TaskStatus::Succeeded)
                                .unwrap_or(false)
                        });
                    if deps_succeeded {
                        if let Some(task) = self.graph.node_weight_mut(index) {
                            task.status = TaskStatus::Ready;
                            ready.push(task.id.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        ready
    }

    // ========== Status transitions ==========

    /// Ready → Running; starts a new attempt.
    pub fn mark_running(&mut self, id: &TaskId) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::Ready {
            return Err(Self::invalid_transition(task, "running"));
        }
        task.status = TaskStatus::Running;
        task.attempt_count += 1;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Running → Succeeded with a validated result.
    ///
    /// A task that is already terminal is left untouched: terminal
    /// statuses are idempotent sinks.
    pub fn mark_succeeded(&mut self, id: &TaskId, result: serde_json::Value) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.is_terminal() {
            return Ok(());
        }
        if task.status != TaskStatus::Running {
            return Err(Self::invalid_transition(task, "succeeded"));
        }
        task.status = TaskStatus::Succeeded;
        task.result = Some(result);
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark a task permanently Failed and cancel every task that
    /// transitively depends on it with `UpstreamFailure`.
    ///
    /// Returns the ids of the cancelled dependents. Independent branches
    /// are not touched. No-op on already-terminal tasks.
    pub fn mark_failed(&mut self, id: &TaskId, error: TaskError) -> Result<Vec<TaskId>> {
        {
            let task = self.get_mut(id)?;
            if task.is_terminal() {
                return Ok(Vec::new());
            }
            task.status = TaskStatus::Failed {
                error: error.clone(),
            };
            task.last_error = Some(error);
            task.completed_at = Some(Utc::now());
        }

        // Walk outgoing edges, cancelling every transitive dependent.
        let mut cancelled = Vec::new();
        let mut queue = self.dependents_of(id);
        while let Some(dependent) = queue.pop() {
            let reason = TaskError::new(
                TaskErrorKind::UpstreamFailure,
                format!("dependency {} failed", id),
            );
            if self.cancel(&dependent, reason)? {
                queue.extend(self.dependents_of(&dependent));
                cancelled.push(dependent);
            }
        }
        Ok(cancelled)
    }

    /// Running → Ready for a bounded retry re-entry, recording the
    /// attempt's failure.
    pub fn requeue(&mut self, id: &TaskId, error: TaskError) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.is_terminal() {
            return Ok(());
        }
        if task.status != TaskStatus::Running {
            return Err(Self::invalid_transition(task, "ready"));
        }
        task.status = TaskStatus::Ready;
        task.last_error = Some(error);
        Ok(())
    }

    /// Cancel a single non-terminal task. Returns `false` (untouched)
    /// when the task is already terminal.
    pub fn cancel(&mut self, id: &TaskId, reason: TaskError) -> Result<bool> {
        let task = self.get_mut(id)?;
        if task.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled {
            reason: reason.clone(),
        };
        task.last_error = Some(reason);
        task.completed_at = Some(Utc::now());
        Ok(true)
    }

    /// Cancel every non-terminal, non-Running task.
    ///
    /// Running tasks are left to resolve on their own: in-flight worker
    /// calls are opaque and run to their own timeout.
    pub fn cancel_idle(&mut self, reason: &TaskError) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self
            .graph
            .node_weights()
            .filter(|t| !t.is_terminal() && t.status != TaskStatus::Running)
            .map(|t| t.id.clone())
            .collect();
        let mut cancelled = Vec::new();
        for id in ids {
            if self.cancel(&id, reason.clone()).unwrap_or(false) {
                cancelled.push(id);
            }
        }
        cancelled
    }

    fn invalid_transition(task: &Task, to: &str) -> Error {
        Error::InvalidTransition {
            task: task.id.to_string(),
            from: task.status.to_string(),
            to: to.to_string(),
        }
    }

    // ========== Terminal queries ==========

    /// Whether every task has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.graph.node_weights().all(|t| t.is_terminal())
    }

    pub fn all_succeeded(&self) -> bool {
        self.graph
            .node_weights()
            .all(|t| t.status == TaskStatus::Succeeded)
    }

    /// Ids of permanently failed tasks.
    pub fn failed_tasks(&self) -> Vec<TaskId> {
        self.graph
            .node_weights()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Tasks in topological order, for stable reporting.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::CyclicGraph(format!("cycle detected at task {}", id))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
