//! Capability registry: the authoritative record of live workers.
//!
//! Workers register a descriptor plus an invoker; the registry indexes
//! them by capability for the selector. Registration order is preserved
//! because it is the final selection tie-breaker.

use crate::error::{Error, Result};
use crate::worker::{Capability, Worker, WorkerDescriptor, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A live registration: descriptor, invoker, and registration sequence.
pub struct RegisteredWorker {
    pub descriptor: WorkerDescriptor,
    pub invoker: Arc<dyn Worker>,
    /// Monotonic registration order; stable across re-registration.
    pub seq: u64,
}

impl std::fmt::Debug for RegisteredWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWorker")
            .field("descriptor", &self.descriptor)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Registry of workers keyed by id, queryable by capability.
///
/// Interior-mutable so the dispatcher can hold it behind an `Arc` while
/// workers register and unregister mid-run. Unregistering never disturbs
/// attempts already in flight: the dispatcher retains its own `Arc` to
/// the registration for the attempt's duration.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    workers: HashMap<WorkerId, Arc<RegisteredWorker>>,
    next_seq: u64,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, validating its descriptor first.
    ///
    /// Re-registering an existing id replaces the descriptor and invoker
    /// but keeps the original registration sequence, so re-registration
    /// does not jump the tie-break queue.
    pub async fn register(
        &self,
        descriptor: WorkerDescriptor,
        invoker: Arc<dyn Worker>,
    ) -> Result<()> {
        descriptor.validate()?;
        let mut inner = self.inner.write().await;
        let seq = match inner.workers.get(&descriptor.id) {
            Some(existing) => existing.seq,
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                seq
            }
        };
        info!(
            worker = %descriptor.id,
            capabilities = ?descriptor.capabilities,
            "worker registered"
        );
        inner.workers.insert(
            descriptor.id.clone(),
            Arc::new(RegisteredWorker {
                descriptor,
                invoker,
                seq,
            }),
        );
        Ok(())
    }

    /// Remove a worker from future selection.
    pub async fn unregister(&self, id: &WorkerId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.workers.remove(id).is_none() {
            return Err(Error::WorkerNotFound(id.as_str().to_string()));
        }
        debug!(worker = %id, "worker unregistered");
        Ok(())
    }

    pub async fn get(&self, id: &WorkerId) -> Option<Arc<RegisteredWorker>> {
        self.inner.read().await.workers.get(id).cloned()
    }

    /// All workers advertising the capability, in registration order.
    pub async fn find_by_capability(&self, capability: &Capability) -> Vec<Arc<RegisteredWorker>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<_> = inner
            .workers
            .values()
            .filter(|w| w.descriptor.can_handle(capability))
            .cloned()
            .collect();
        matches.sort_by_key(|w| w.seq);
        matches
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.workers.is_empty()
    }
}
