//! Core domain models for the orchestration engine.
//!
//! This module contains the fundamental data structures used throughout
//! the system: tasks, the dependency graph they form, and the plan that
//! carries one goal from planning to a terminal report.

pub mod graph;
pub mod plan;
pub mod task;

pub use graph::TaskGraph;
pub use plan::{PlanId, PlanOutcome, PlanReport, PlanSpec, PlanState, Planner, TaskRecord};
pub use task::{Task, TaskError, TaskErrorKind, TaskId, TaskStatus};
