//! N-way merge decorator
//!
//! Merges two or more children that are already sorted under the shared
//! `on` comparator into one globally ordered sequence. Delegates to the
//! shared merge primitive.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{comparator_param, stream_children, StreamFactory};
use crate::merge::SortedMerge;
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};

pub struct MergeStream {
    merge: SortedMerge,
    finished: bool,
}

impl MergeStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let on = comparator_param(node, "merge", "on")?;
        let children = stream_children(node, factory);
        if children.len() < 2 {
            return Err(StreamError::malformed("merge", "at least two nested streams"));
        }
        let streams = children
            .into_iter()
            .map(|child| factory.construct(child))
            .collect::<StreamResult<Vec<_>>>()?;
        Ok(Self {
            merge: SortedMerge::new(streams, on),
            finished: false,
        })
    }
}

#[async_trait]
impl TupleStream for MergeStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.merge.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let tuple = self.merge.next().await?;
        if tuple.is_eof() {
            self.finished = true;
        }
        Ok(tuple)
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.merge.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.merge.comparator().clone())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(MergeStream::from_expr(node, factory)?))
}
