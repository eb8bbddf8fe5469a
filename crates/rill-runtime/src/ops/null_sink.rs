//! Null sink decorator
//!
//! Drains its child and emits a single summary tuple with the count of
//! consumed tuples (`nullCount`). Useful for exercising a pipeline's
//! full cost without shipping its output, and as a worker summary under
//! parallel execution.

use crate::context::StreamContext;
use crate::error::StreamResult;
use crate::factory::{optional_comparator, single_stream_child, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};

pub struct NullStream {
    child: Box<dyn TupleStream>,
    by: Option<Comparator>,
    state: NullState,
}

enum NullState {
    Draining,
    Summary,
    Finished,
}

impl NullStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Ok(Self {
            child: single_stream_child(node, "null", factory)?,
            by: optional_comparator(node, "null", "by")?,
            state: NullState::Draining,
        })
    }
}

#[async_trait]
impl TupleStream for NullStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        match self.state {
            NullState::Draining => {
                let mut count: i64 = 0;
                loop {
                    let tuple = self.child.read().await?;
                    if tuple.is_eof() {
                        break;
                    }
                    count += 1;
                }
                self.state = NullState::Summary;
                Ok(Tuple::new().with_field("nullCount", count))
            }
            NullState::Summary => {
                self.state = NullState::Finished;
                Ok(Tuple::eof())
            }
            NullState::Finished => Ok(Tuple::eof()),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        self.by.clone()
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(NullStream::from_expr(node, factory)?))
}
