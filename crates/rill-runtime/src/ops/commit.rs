//! Commit decorator for mutation pipelines
//!
//! Wraps an update or delete sink, passing its control tuples through
//! unchanged while tracking the indexed counts. A backend commit is
//! issued whenever `batchSize` documents have accumulated since the last
//! commit (when set) and always once the upstream reaches EOF.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{bool_param, collection_arg, single_stream_child, usize_param, StreamFactory};
use crate::ops::update::BATCH_INDEXED_FIELD;
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, Tuple};

pub struct CommitStream {
    collection: String,
    batch_size: usize,
    wait_searcher: bool,
    child: Box<dyn TupleStream>,
    ctx: Option<StreamContext>,
    uncommitted: i64,
    finished: bool,
}

impl CommitStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            collection: collection_arg(node, "commit")?,
            batch_size: usize_param(node, "commit", "batchSize", 0)?,
            wait_searcher: bool_param(node, "commit", "waitSearcher", false)?,
            child: single_stream_child(node, "commit", factory)?,
            ctx: None,
            uncommitted: 0,
            finished: false,
        })
    }

    async fn commit(&mut self) -> StreamResult<()> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| StreamError::Execution("commit read before open".to_string()))?;
        ctx.backend
            .commit(&self.collection, self.wait_searcher)
            .await?;
        self.uncommitted = 0;
        Ok(())
    }
}

#[async_trait]
impl TupleStream for CommitStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.ctx = Some(ctx.clone());
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let tuple = self.child.read().await?;
        if tuple.is_eof() {
            self.finished = true;
            self.commit().await?;
            return Ok(tuple);
        }
        if let Some(indexed) = tuple.get_int(BATCH_INDEXED_FIELD) {
            self.uncommitted += indexed;
            if self.batch_size > 0 && self.uncommitted >= self.batch_size as i64 {
                self.commit().await?;
            }
        }
        Ok(tuple)
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.child.close().await
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(CommitStream::from_expr(node, factory)?))
}
