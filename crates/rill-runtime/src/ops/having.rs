//! Having filter decorator
//!
//! Wraps a boolean predicate tree and passes through the tuples it
//! matches. Ordering is preserved.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::eval::Predicate;
use crate::factory::{stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};

pub struct HavingStream {
    child: Box<dyn TupleStream>,
    predicate: Predicate,
}

impl HavingStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let children = stream_children(node, factory);
        let child = match children.as_slice() {
            [child] => factory.construct(child)?,
            _ => return Err(StreamError::malformed("having", "exactly one nested stream")),
        };
        let predicate_node = node
            .expr_args()
            .find(|n| !factory.is_registered(&n.name))
            .ok_or_else(|| StreamError::malformed("having", "a boolean predicate"))?;
        Ok(Self {
            child,
            predicate: Predicate::from_node(predicate_node)?,
        })
    }
}

#[async_trait]
impl TupleStream for HavingStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() || self.predicate.matches(&tuple) {
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
    Ok(Box::new(HavingStream::from_expr(node, factory)?))
}
