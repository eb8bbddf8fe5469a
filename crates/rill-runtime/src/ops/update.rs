//! Batched update sink
//!
//! Accumulates upstream tuples into batches of `batchSize` and flushes
//! each full batch (and the final partial batch at EOF) as one bulk add
//! against the target collection. One control tuple is emitted per
//! flush, reporting the batch's accepted count and the cumulative count
//! so far.

use crate::backend::{MutationOp, MutationOutcome, VERSION_FIELD};
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{bool_param, collection_arg, single_stream_child, usize_param, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, Tuple};
use tracing::warn;

/// Batch-success count on a sink's control tuple.
pub const BATCH_INDEXED_FIELD: &str = "batchIndexed";

/// Cumulative-success count on a sink's control tuple.
pub const TOTAL_INDEXED_FIELD: &str = "totalIndexed";

pub struct UpdateStream {
    collection: String,
    batch_size: usize,
    prune_version: bool,
    child: Box<dyn TupleStream>,
    ctx: Option<StreamContext>,
    batch: Vec<MutationOp>,
    total: i64,
    upstream_done: bool,
    finished: bool,
}

impl UpdateStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            collection: collection_arg(node, "update")?,
            batch_size: usize_param(node, "update", "batchSize", 250)?,
            // adds carry fresh versions; stale upstream stamps are
            // stripped unless the caller opts out
            prune_version: bool_param(node, "update", "pruneVersionField", true)?,
            child: single_stream_child(node, "update", factory)?,
            ctx: None,
            batch: Vec::new(),
            total: 0,
            upstream_done: false,
            finished: false,
        })
    }

    fn stage(&mut self, tuple: Tuple) {
        let mut doc = tuple;
        if self.prune_version {
            doc.fields.shift_remove(VERSION_FIELD);
        }
        self.batch.push(MutationOp::Add { doc });
    }

    async fn flush(&mut self) -> StreamResult<Tuple> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| StreamError::Execution("update read before open".to_string()))?;
        let ops = std::mem::take(&mut self.batch);
        let outcome = ctx.backend.mutate(&self.collection, &ops).await?;
        log_rejections("update", &self.collection, &outcome);
        self.total += outcome.accepted as i64;
        Ok(Tuple::new()
            .with_field(BATCH_INDEXED_FIELD, outcome.accepted as i64)
            .with_field(TOTAL_INDEXED_FIELD, self.total))
    }
}

pub(crate) fn log_rejections(op: &str, collection: &str, outcome: &MutationOutcome) {
    for rejected in &outcome.rejected {
        warn!(
            collection,
            key = %rejected.key,
            "{} rejected: {}",
            op,
            rejected.reason
        );
    }
}

#[async_trait]
impl TupleStream for UpdateStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.ctx = Some(ctx.clone());
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        loop {
            if self.upstream_done {
                if !self.batch.is_empty() {
                    return self.flush().await;
                }
                self.finished = true;
                return Ok(Tuple::eof());
            }
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                self.upstream_done = true;
                continue;
            }
            self.stage(tuple);
            if self.batch.len() >= self.batch_size {
                return self.flush().await;
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.batch.clear();
        self.child.close().await
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(UpdateStream::from_expr(node, factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::stream::{collect, VecStream};
    use std::sync::Arc;

    fn docs(n: usize) -> Vec<Tuple> {
        (0..n)
            .map(|i| {
                Tuple::new()
                    .with_field("id", i as i64)
                    .with_field("a_i", (i * 10) as i64)
            })
            .collect()
    }

    fn update(batch_size: usize, input: Vec<Tuple>) -> UpdateStream {
        UpdateStream {
            collection: "target".to_string(),
            batch_size,
            prune_version: true,
            child: Box::new(VecStream::new(input)),
            ctx: None,
            batch: Vec::new(),
            total: 0,
            upstream_done: false,
            finished: false,
        }
    }

    #[tokio::test]
    async fn test_update_batches_and_counts() {
        let backend = Arc::new(MemoryBackend::new(1));
        let ctx = StreamContext::new(backend.clone());
        let mut stream = update(2, docs(5));
        let controls = collect(&mut stream, &ctx).await.unwrap();
        let totals: Vec<i64> = controls
            .iter()
            .map(|t| t.get_int(TOTAL_INDEXED_FIELD).unwrap())
            .collect();
        assert_eq!(totals, vec![2, 4, 5]);
        assert_eq!(controls[2].get_int(BATCH_INDEXED_FIELD), Some(1));
        assert_eq!(backend.doc_count("target"), 5);
    }

    #[tokio::test]
    async fn test_update_prunes_stale_versions() {
        let backend = Arc::new(MemoryBackend::new(1));
        let ctx = StreamContext::new(backend.clone());
        let stale = vec![Tuple::new()
            .with_field("id", 0i64)
            .with_field(VERSION_FIELD, 999_999i64)];
        let mut stream = update(10, stale);
        collect(&mut stream, &ctx).await.unwrap();

        let mut req = crate::backend::QueryRequest::collection("target");
        req.filter = "id:0".to_string();
        let stored = ctx.backend.query(&req).await.unwrap();
        // the backend stamped its own version, not the stale one
        assert_ne!(stored[0].get_int(VERSION_FIELD), Some(999_999));
    }

    #[tokio::test]
    async fn test_update_empty_input_emits_no_controls() {
        let ctx = StreamContext::new(Arc::new(MemoryBackend::new(1)));
        let mut stream = update(2, vec![]);
        let controls = collect(&mut stream, &ctx).await.unwrap();
        assert!(controls.is_empty());
    }

    #[tokio::test]
    async fn test_update_exact_multiple_of_batch() {
        let backend = Arc::new(MemoryBackend::new(1));
        let ctx = StreamContext::new(backend.clone());
        let mut stream = update(2, docs(4));
        let controls = collect(&mut stream, &ctx).await.unwrap();
        assert_eq!(controls.len(), 2);
        assert_eq!(backend.doc_count("target"), 4);
    }
}
