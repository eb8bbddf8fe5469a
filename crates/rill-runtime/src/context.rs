//! Shared per-pipeline execution context

use crate::backend::SearchBackend;
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use std::sync::Arc;

/// Worker slot assigned by the parallel execution layer. Sources that
/// declare partition keys restrict their queries to this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    pub worker: usize,
    pub workers: usize,
}

/// Connection and collaborator handles shared by every operator of one
/// pipeline. Created by the caller, passed to `open()`, cheap to clone;
/// operators never mutate it. The handles are `Arc`'d and safe under
/// concurrent access from parallel workers.
#[derive(Clone)]
pub struct StreamContext {
    pub backend: Arc<dyn SearchBackend>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub worker_slot: Option<WorkerSlot>,
}

impl StreamContext {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            worker_slot: None,
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Context seen by one parallel worker.
    pub fn for_worker(&self, worker: usize, workers: usize) -> Self {
        let mut ctx = self.clone();
        ctx.worker_slot = Some(WorkerSlot { worker, workers });
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_for_worker_sets_slot() {
        let ctx = StreamContext::new(Arc::new(MemoryBackend::new(1)));
        assert!(ctx.worker_slot.is_none());
        let worker_ctx = ctx.for_worker(2, 4);
        assert_eq!(worker_ctx.worker_slot, Some(WorkerSlot { worker: 2, workers: 4 }));
        // the original is untouched
        assert!(ctx.worker_slot.is_none());
    }
}
