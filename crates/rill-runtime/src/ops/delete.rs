//! Batched delete sink
//!
//! Deletes documents by their `id` field in batches of `batchSize`. Each
//! tuple's version stamp rides along for optimistic concurrency unless
//! `pruneVersionField=true` strips it, disabling the check. On a
//! tolerant backend a stale-version record fails individually; the
//! control-tuple counters reflect successes, not batch size.

use crate::backend::{MutationOp, VERSION_FIELD};
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{bool_param, collection_arg, single_stream_child, usize_param, StreamFactory};
use crate::ops::update::{log_rejections, BATCH_INDEXED_FIELD, TOTAL_INDEXED_FIELD};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, Tuple};

pub struct DeleteStream {
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

impl DeleteStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            collection: collection_arg(node, "delete")?,
            batch_size: usize_param(node, "delete", "batchSize", 250)?,
            prune_version: bool_param(node, "delete", "pruneVersionField", false)?,
            child: single_stream_child(node, "delete", factory)?,
            ctx: None,
            batch: Vec::new(),
            total: 0,
            upstream_done: false,
            finished: false,
        })
    }

    fn stage(&mut self, tuple: &Tuple) -> StreamResult<()> {
        let key = tuple
            .get("id")
            .cloned()
            .ok_or_else(|| StreamError::Execution("delete: tuple has no 'id' field".to_string()))?;
        let version = if self.prune_version {
            None
        } else {
            tuple.get_int(VERSION_FIELD)
        };
        self.batch.push(MutationOp::Delete { key, version });
        Ok(())
    }

    async fn flush(&mut self) -> StreamResult<Tuple> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| StreamError::Execution("delete read before open".to_string()))?;
        let ops = std::mem::take(&mut self.batch);
        let outcome = ctx.backend.mutate(&self.collection, &ops).await?;
        log_rejections("delete", &self.collection, &outcome);
        self.total += outcome.accepted as i64;
        Ok(Tuple::new()
            .with_field(BATCH_INDEXED_FIELD, outcome.accepted as i64)
            .with_field(TOTAL_INDEXED_FIELD, self.total))
    }
}

#[async_trait]
impl TupleStream for DeleteStream {
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
            self.stage(&tuple)?;
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
    Ok(Box::new(DeleteStream::from_expr(node, factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::stream::{collect, VecStream};
    use std::sync::Arc;

    fn seeded(n: usize) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(1));
        backend.index(
            "target",
            (0..n)
                .map(|i| Tuple::new().with_field("id", i as i64))
                .collect(),
        );
        backend
    }

    fn delete(batch_size: usize, prune_version: bool, input: Vec<Tuple>) -> DeleteStream {
        DeleteStream {
            collection: "target".to_string(),
            batch_size,
            prune_version,
            child: Box::new(VecStream::new(input)),
            ctx: None,
            batch: Vec::new(),
            total: 0,
            upstream_done: false,
            finished: false,
        }
    }

    fn keys(n: usize) -> Vec<Tuple> {
        (0..n)
            .map(|i| Tuple::new().with_field("id", i as i64))
            .collect()
    }

    #[tokio::test]
    async fn test_delete_cumulative_counts() {
        let backend = seeded(5);
        let ctx = StreamContext::new(backend.clone());
        let mut stream = delete(2, false, keys(5));
        let controls = collect(&mut stream, &ctx).await.unwrap();
        let totals: Vec<i64> = controls
            .iter()
            .map(|t| t.get_int(TOTAL_INDEXED_FIELD).unwrap())
            .collect();
        assert_eq!(totals, vec![2, 4, 5]);
        assert_eq!(backend.doc_count("target"), 0);
    }

    #[tokio::test]
    async fn test_delete_stale_version_skips_record_only() {
        let backend = seeded(3);
        let ctx = StreamContext::new(backend.clone());
        let input = vec![
            Tuple::new()
                .with_field("id", 0i64)
                .with_field(VERSION_FIELD, 999_999i64),
            Tuple::new().with_field("id", 1i64),
            Tuple::new().with_field("id", 2i64),
        ];
        let mut stream = delete(3, false, input);
        let controls = collect(&mut stream, &ctx).await.unwrap();
        assert_eq!(controls[0].get_int(BATCH_INDEXED_FIELD), Some(2));
        // the conflicting document survives
        assert_eq!(backend.doc_count("target"), 1);
    }

    #[tokio::test]
    async fn test_prune_version_disables_concurrency_check() {
        let backend = seeded(1);
        let ctx = StreamContext::new(backend.clone());
        let input = vec![Tuple::new()
            .with_field("id", 0i64)
            .with_field(VERSION_FIELD, 999_999i64)];
        let mut stream = delete(1, true, input);
        let controls = collect(&mut stream, &ctx).await.unwrap();
        assert_eq!(controls[0].get_int(BATCH_INDEXED_FIELD), Some(1));
        assert_eq!(backend.doc_count("target"), 0);
    }

    #[tokio::test]
    async fn test_delete_requires_id_field() {
        let backend = seeded(1);
        let ctx = StreamContext::new(backend);
        let input = vec![Tuple::new().with_field("a_i", 1i64)];
        let mut stream = delete(1, false, input);
        stream.open(&ctx).await.unwrap();
        assert!(stream.read().await.is_err());
    }
}
