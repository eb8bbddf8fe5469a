//! External sort decorator
//!
//! Buffers the whole upstream, stable-sorts by the declared comparator,
//! then replays. Used when upstream ordering does not satisfy a
//! downstream requirement. The stable sort keeps tie-break behavior
//! deterministic.

use crate::context::StreamContext;
use crate::error::StreamResult;
use crate::factory::{comparator_param, single_stream_child, StreamFactory};
use crate::stream::{TupleStream, VecStream};
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};

pub struct SortStream {
    child: Box<dyn TupleStream>,
    by: Comparator,
    replay: Option<VecStream>,
}

impl SortStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            child: single_stream_child(node, "sort", factory)?,
            by: comparator_param(node, "sort", "by")?,
            replay: None,
        })
    }

    async fn buffer_upstream(&mut self) -> StreamResult<()> {
        let mut tuples = Vec::new();
        let terminal = loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                break tuple;
            }
            tuples.push(tuple);
        };
        tuples.sort_by(|a, b| self.by.compare(a, b));
        self.replay = Some(VecStream::new(tuples).with_terminal(terminal));
        Ok(())
    }
}

#[async_trait]
impl TupleStream for SortStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.replay.is_none() {
            self.buffer_upstream().await?;
        }
        self.replay
            .as_mut()
            .expect("replay buffered")
            .read()
            .await
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.replay = None;
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.by.clone())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(SortStream::from_expr(node, factory)?))
}
