//! Parallel partitioned execution
//!
//! `parallel(collection, workers=W, sort=..., innerExpr)` runs W
//! instances of the inner expression, one tokio task per worker. Worker
//! *i* opens with a context carrying slot `(i, W)`, so partition-key
//! sources only feed it records with `hash(partitionKeys) % W == i`.
//! Each worker drains into a bounded channel; the operator N-way-merges
//! the channel-backed streams under the global comparator, which is a
//! valid total order within any hash partition. One EOF per worker is
//! collected, keyed by worker index, and exposed after the merge
//! completes. A worker failure fails the whole merge.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{comparator_param, stream_children, usize_param, StreamFactory};
use crate::merge::SortedMerge;
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const WORKER_CHANNEL_CAPACITY: usize = 64;

/// Worker-index metadata field stamped onto each worker's EOF tuple.
pub const WORKER_ID_FIELD: &str = "workerId";

/// Channel-backed stream head for one worker's output.
struct WorkerStream {
    rx: mpsc::Receiver<StreamResult<Tuple>>,
}

#[async_trait]
impl TupleStream for WorkerStream {
    async fn open(&mut self, _ctx: &StreamContext) -> StreamResult<()> {
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(StreamError::Execution(
                "worker terminated without an EOF tuple".to_string(),
            )),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.rx.close();
        Ok(())
    }
}

pub struct ParallelStream {
    workers: usize,
    comparator: Comparator,
    instances: Vec<Box<dyn TupleStream>>,
    handles: Vec<JoinHandle<()>>,
    merge: Option<SortedMerge>,
    eof_tuples: HashMap<usize, Tuple>,
    finished: bool,
}

impl ParallelStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let workers = usize_param(node, "parallel", "workers", 0)?;
        if workers == 0 {
            return Err(StreamError::invalid("parallel", "workers", "must be at least 1"));
        }
        let comparator = comparator_param(node, "parallel", "sort")?;
        let children = stream_children(node, factory);
        let inner = match children.as_slice() {
            [inner] => *inner,
            _ => return Err(StreamError::malformed("parallel", "exactly one nested stream")),
        };
        let instances = (0..workers)
            .map(|_| factory.construct(inner))
            .collect::<StreamResult<Vec<_>>>()?;
        Ok(Self {
            workers,
            comparator,
            instances,
            handles: Vec::new(),
            merge: None,
            eof_tuples: HashMap::new(),
            finished: false,
        })
    }

    /// Per-worker EOF tuples, keyed by worker index. Populated once the
    /// main sequence has completed; consumers can assert the map's size
    /// equals the worker count.
    pub fn eof_tuples(&self) -> &HashMap<usize, Tuple> {
        &self.eof_tuples
    }

    async fn drive_worker(
        worker: usize,
        mut instance: Box<dyn TupleStream>,
        ctx: StreamContext,
        tx: mpsc::Sender<StreamResult<Tuple>>,
    ) {
        if let Err(err) = instance.open(&ctx).await {
            let _ = tx.send(Err(err)).await;
            return;
        }
        loop {
            match instance.read().await {
                Ok(tuple) => {
                    let eof = tuple.is_eof();
                    let tuple = if eof {
                        tuple.with_field(WORKER_ID_FIELD, worker as i64)
                    } else {
                        tuple
                    };
                    // a closed channel means the consumer went away
                    if tx.send(Ok(tuple)).await.is_err() || eof {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
        if let Err(err) = instance.close().await {
            debug!(worker, "worker close failed: {err}");
        }
    }
}

#[async_trait]
impl TupleStream for ParallelStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        let mut heads: Vec<Box<dyn TupleStream>> = Vec::with_capacity(self.workers);
        for (worker, instance) in self.instances.drain(..).enumerate() {
            let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
            let worker_ctx = ctx.for_worker(worker, self.workers);
            self.handles.push(tokio::spawn(Self::drive_worker(
                worker, instance, worker_ctx, tx,
            )));
            heads.push(Box::new(WorkerStream { rx }));
        }
        let mut merge = SortedMerge::new(heads, self.comparator.clone());
        merge.open(ctx).await?;
        self.merge = Some(merge);
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let merge = self
            .merge
            .as_mut()
            .ok_or_else(|| StreamError::Execution("parallel read before open".to_string()))?;
        let tuple = merge.next().await?;
        if tuple.is_eof() {
            self.finished = true;
            for eof in merge.eof_tuples() {
                if let Some(worker) = eof.get_int(WORKER_ID_FIELD) {
                    self.eof_tuples.insert(worker as usize, eof.clone());
                }
            }
        }
        Ok(tuple)
    }

    async fn close(&mut self) -> StreamResult<()> {
        // dropping the merge drops the receivers; workers observe the
        // closed channel and exit on their next send
        if let Some(mut merge) = self.merge.take() {
            merge.close().await?;
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.comparator.clone())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(ParallelStream::from_expr(node, factory)?))
}
