//! Conductor: a goal-to-graph orchestration core.
//!
//! A goal enters as natural language, is turned into a validated,
//! dependency-ordered task graph by a pluggable planner, and is driven to
//! a terminal report by a dispatcher that routes each task to a
//! capability-matched worker, validates payloads against structural
//! contracts, retries transient failures with bounded backoff, and
//! cascades upstream failures without tearing down independent branches.
//!
//! The crate is a library core: planners and workers are trait objects
//! supplied by the embedding application.

pub mod config;
pub mod contract;
pub mod core;
pub mod error;
pub mod orchestration;
pub mod worker;

pub use config::{OrchestratorConfig, RetryConfig, WorkerConfig};
pub use contract::{Contract, FieldSpec, Shape, ValidationResult, Violation};
pub use crate::core::{
    PlanId, PlanOutcome, PlanReport, PlanSpec, PlanState, Planner, Task, TaskError, TaskErrorKind,
    TaskGraph, TaskId, TaskRecord, TaskStatus,
};
pub use error::{Error, Result};
pub use orchestration::{
    CapabilityRegistry, Dispatcher, DispatcherConfig, DispatcherEvent, FeedbackEntry,
    FeedbackOutcome, FeedbackSink, Selection, WorkerSelector,
};
pub use worker::{
    BackoffKind, Capability, InvocationError, RetryPolicy, Worker, WorkerDescriptor, WorkerId,
};
