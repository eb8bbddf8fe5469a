//! Literal streams
//!
//! `tuple(k=v, ...)` emits a single tuple built from its parameters;
//! `list(streamA, streamB, ...)` concatenates its children's outputs in
//! order. Both come from the original expression surface and are mostly
//! used to feed mutation sinks and tests.

use crate::context::StreamContext;
use crate::error::StreamResult;
use crate::factory::{stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, ParamValue, Tuple, Value};

pub struct TupleLiteralStream {
    tuple: Option<Tuple>,
}

impl TupleLiteralStream {
    pub fn from_expr(node: &ExprNode) -> StreamResult<Self> {
        let mut tuple = Tuple::new();
        for (key, value) in &node.params {
            if let ParamValue::Str(text) = value {
                tuple = tuple.with_field(key.clone(), Value::parse(text));
            }
        }
        Ok(Self { tuple: Some(tuple) })
    }
}

#[async_trait]
impl TupleStream for TupleLiteralStream {
    async fn open(&mut self, _ctx: &StreamContext) -> StreamResult<()> {
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        Ok(self.tuple.take().unwrap_or_else(Tuple::eof))
    }

    async fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

pub struct ListStream {
    children: Vec<Box<dyn TupleStream>>,
    current: usize,
}

impl ListStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let children = stream_children(node, factory)
            .into_iter()
            .map(|child| factory.construct(child))
            .collect::<StreamResult<Vec<_>>>()?;
        Ok(Self {
            children,
            current: 0,
        })
    }
}

#[async_trait]
impl TupleStream for ListStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        for child in &mut self.children {
            child.open(ctx).await?;
        }
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        while self.current < self.children.len() {
            let tuple = self.children[self.current].read().await?;
            if tuple.is_eof() {
                self.current += 1;
                continue;
            }
            return Ok(tuple);
        }
        Ok(Tuple::eof())
    }

    async fn close(&mut self) -> StreamResult<()> {
        for child in &mut self.children {
            child.close().await?;
        }
        Ok(())
    }
}

pub(crate) fn construct_tuple(
    node: &ExprNode,
    _factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(TupleLiteralStream::from_expr(node)?))
}

pub(crate) fn construct_list(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(ListStream::from_expr(node, factory)?))
}
