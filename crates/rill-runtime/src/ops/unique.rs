//! Distinct-by-key decorator
//!
//! Input must arrive sorted by the key fields; emits the first tuple of
//! each run of equal keys with O(1) extra state.

use crate::context::StreamContext;
use crate::error::StreamResult;
use crate::factory::{comparator_param, single_stream_child, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};

pub struct UniqueStream {
    child: Box<dyn TupleStream>,
    over: Comparator,
    previous: Option<Tuple>,
}

impl UniqueStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            child: single_stream_child(node, "unique", factory)?,
            over: comparator_param(node, "unique", "over")?,
            previous: None,
        })
    }
}

#[async_trait]
impl TupleStream for UniqueStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                return Ok(tuple);
            }
            let is_duplicate = self
                .previous
                .as_ref()
                .map(|prev| self.over.same_key(prev, &tuple))
                .unwrap_or(false);
            if !is_duplicate {
                self.previous = Some(tuple.clone());
                return Ok(tuple);
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        self.child.sort_order()
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(UniqueStream::from_expr(node, factory)?))
}
