//! Orchestration layer: routing tasks to workers and folding results.
//!
//! This module owns the machinery between a validated plan and its
//! terminal report: the capability registry of live workers, the
//! deterministic selector, the dispatch loop that drives attempts, and
//! the append-only feedback log of outcomes.

mod dispatcher;
mod feedback;
mod registry;
mod selector;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherEvent};
pub use feedback::{FeedbackEntry, FeedbackOutcome, FeedbackSink};
pub use registry::{CapabilityRegistry, RegisteredWorker};
pub use selector::{Selection, WorkerSelector};
