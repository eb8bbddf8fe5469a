//! Checkpoint cursor storage
//!
//! Continuous topic consumption persists a high-water-mark cursor keyed
//! by a caller-supplied identity so that a later run, even after a
//! process restart, resumes from the last durable position. Delivery is
//! at-least-once: a crash between consumption and checkpoint write
//! redelivers the last batch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("checkpoint store I/O error: {0}")]
    Io(String),

    #[error("checkpoint store serialization error: {0}")]
    Serialization(String),
}

/// Durable cursor storage, external to the engine.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<u64>, StoreError>;

    async fn put(&self, identity: &str, cursor: u64) -> Result<(), StoreError>;
}

/// In-memory checkpoint store for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    cursors: RwLock<HashMap<String, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, identity: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .cursors
            .read()
            .expect("cursor lock poisoned")
            .get(identity)
            .copied())
    }

    async fn put(&self, identity: &str, cursor: u64) -> Result<(), StoreError> {
        self.cursors
            .write()
            .expect("cursor lock poisoned")
            .insert(identity.to_string(), cursor);
        Ok(())
    }
}
