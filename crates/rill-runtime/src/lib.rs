//! # Rill Runtime
//!
//! The streaming expression execution engine: a pull-based dataflow
//! runtime that composes relational-style operators into a tree and
//! drives them by repeatedly pulling tuples from the root.
//!
//! Pipelines are built from parsed expression text through a
//! [`StreamFactory`], opened against a [`StreamContext`] carrying the
//! external collaborators (a [`SearchBackend`] and a
//! [`CheckpointStore`]), and drained with [`TupleStream::read`] until
//! the terminal EOF tuple:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rill_runtime::{MemoryBackend, StreamContext, StreamFactory, collect};
//! # async fn run() -> Result<(), rill_runtime::StreamError> {
//! let factory = StreamFactory::default();
//! let mut pipeline = factory.construct_str(
//!     "unique(search(logs, q=*:*, sort=\"a_f asc\"), over=\"a_f\")",
//! )?;
//! let ctx = StreamContext::new(Arc::new(MemoryBackend::new(2)));
//! let tuples = collect(pipeline.as_mut(), &ctx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Scheduling is single-threaded pull, except inside the parallel layer
//! (one task per worker) and the daemon layer (one background polling
//! task per instance); both join their tasks on `close()`.

pub mod aggregate;
pub mod backend;
pub mod checkpoint;
pub mod context;
pub mod error;
pub mod eval;
pub mod factory;
pub mod merge;
pub mod ops;
pub mod stream;

pub use backend::{
    partition_hash, BackendError, MemoryBackend, MutationOp, MutationOutcome, PartitionSpec,
    QueryRequest, RejectedOp, SearchBackend, VERSION_FIELD,
};
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, StoreError};
pub use context::{StreamContext, WorkerSlot};
pub use error::{StreamError, StreamResult};
pub use factory::StreamFactory;
pub use merge::SortedMerge;
pub use stream::{collect, TupleStream, VecStream};
