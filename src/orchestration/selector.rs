//! Deterministic worker selection.
//!
//! Given the workers advertising a capability and the current in-flight
//! counts, the selector picks exactly one worker or reports why it
//! cannot. Selection is a pure function of its inputs so the same state
//! always produces the same choice.

use crate::orchestration::registry::RegisteredWorker;
use crate::worker::{Capability, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a selection round for one task.
#[derive(Debug)]
pub enum Selection {
    Selected(Arc<RegisteredWorker>),
    /// Matching workers exist but all are at their concurrency limit.
    /// The task stays eligible and selection is retried later.
    Saturated,
    /// No registered worker advertises the capability. Permanent for
    /// this selection round; the dispatcher fails the task.
    NoCapability,
}

/// Stateless selection policy.
///
/// Ordering: higher priority wins, then fewer in-flight invocations,
/// then earlier registration. The in-flight counts are owned by the
/// dispatcher, which is the only component that starts and finishes
/// attempts.
#[derive(Debug, Default)]
pub struct WorkerSelector;

impl WorkerSelector {
    pub fn new() -> Self {
        Self
    }

    /// Pick a worker for `capability` from `candidates` (registration
    /// order) given current per-worker in-flight counts.
    pub fn select(
        &self,
        capability: &Capability,
        candidates: &[Arc<RegisteredWorker>],
        in_flight: &HashMap<WorkerId, usize>,
    ) -> Selection {
        let matching: Vec<_> = candidates
            .iter()
            .filter(|w| w.descriptor.can_handle(capability))
            .collect();
        if matching.is_empty() {
            return Selection::NoCapability;
        }

        let mut available: Vec<_> = matching
            .into_iter()
            .filter(|w| {
                let current = in_flight
                    .get(&w.descriptor.id)
                    .copied()
                    .unwrap_or(0);
                current < w.descriptor.concurrency_limit
            })
            .collect();
        if available.is_empty() {
            return Selection::Saturated;
        }

        available.sort_by(|a, b| {
            b.descriptor
                .priority
                .cmp(&a.descriptor.priority)
                .then_with(|| {
                    let a_load = in_flight.get(&a.descriptor.id).copied().unwrap_or(0);
                    let b_load = in_flight.get(&b.descriptor.id).copied().unwrap_or(0);
                    a_load.cmp(&b_load)
                })
                .then_with(|| a.seq.cmp(&b.seq))
        });
        Selection::Selected(Arc::clone(available[0]))
    }
}
