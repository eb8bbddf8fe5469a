//! Top-N rank decorator
//!
//! Keeps the N best tuples under the declared comparator while
//! exhausting the whole upstream, then emits them in final sorted
//! order. Bounded memory: N tuples. Not a true streaming operator.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{comparator_param, single_stream_child, usize_param, StreamFactory};
use crate::stream::{TupleStream, VecStream};
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};
use std::cmp::Ordering;

pub struct RankStream {
    child: Box<dyn TupleStream>,
    n: usize,
    comparator: Comparator,
    replay: Option<VecStream>,
}

impl RankStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let n = usize_param(node, "top", "n", 0)?;
        if n == 0 {
            return Err(StreamError::invalid("top", "n", "must be at least 1"));
        }
        Ok(Self {
            child: single_stream_child(node, "top", factory)?,
            n,
            comparator: comparator_param(node, "top", "sort")?,
            replay: None,
        })
    }

    async fn rank_upstream(&mut self) -> StreamResult<()> {
        // kept sorted best-first; insertion after equal entries makes
        // ties resolve to input order
        let mut best: Vec<Tuple> = Vec::with_capacity(self.n + 1);
        let terminal = loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                break tuple;
            }
            let pos = best
                .partition_point(|t| self.comparator.compare(t, &tuple) != Ordering::Greater);
            if pos < self.n {
                best.insert(pos, tuple);
                best.truncate(self.n);
            }
        };
        self.replay = Some(VecStream::new(best).with_terminal(terminal));
        Ok(())
    }
}

#[async_trait]
impl TupleStream for RankStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.replay.is_none() {
            self.rank_upstream().await?;
        }
        self.replay
            .as_mut()
            .expect("ranked buffer present")
            .read()
            .await
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.replay = None;
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.comparator.clone())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(RankStream::from_expr(node, factory)?))
}
