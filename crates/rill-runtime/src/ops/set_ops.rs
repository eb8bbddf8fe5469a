//! Set algebra over sorted streams
//!
//! `intersect(left, right, on=...)` emits the left tuples whose key has
//! a match on the right; `complement(left, right, on=...)` emits those
//! without one. Both inputs must be sorted by the `on` keys.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{required_str, stream_children, StreamFactory};
use crate::ops::join::JoinKeys;
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, SortDirection, Tuple, Value};
use std::cmp::Ordering;

pub struct SetOperationStream {
    left: Box<dyn TupleStream>,
    right: Box<dyn TupleStream>,
    keys: JoinKeys,
    directions: Vec<SortDirection>,
    /// true emits matching left tuples (intersect), false the others
    /// (complement)
    keep_matches: bool,
    right_head: Option<Tuple>,
    right_exhausted: bool,
}

impl SetOperationStream {
    fn from_expr(
        node: &ExprNode,
        factory: &StreamFactory,
        op: &str,
        keep_matches: bool,
    ) -> StreamResult<Self> {
        let keys = JoinKeys::parse(required_str(node, op, "on")?, op)?;
        let children = stream_children(node, factory);
        let (left_node, right_node) = match children.as_slice() {
            [l, r] => (*l, *r),
            _ => return Err(StreamError::malformed(op, "exactly two nested streams")),
        };
        let left = factory.construct(left_node)?;
        let directions = keys
            .left
            .iter()
            .map(|field| {
                left.sort_order()
                    .and_then(|order| {
                        order
                            .fields
                            .iter()
                            .find(|sf| &sf.field == field)
                            .map(|sf| sf.direction)
                    })
                    .unwrap_or(SortDirection::Ascending)
            })
            .collect();
        Ok(Self {
            left,
            right: factory.construct(right_node)?,
            keys,
            directions,
            keep_matches,
            right_head: None,
            right_exhausted: false,
        })
    }

    pub fn intersect(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "intersect", true)
    }

    pub fn complement(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "complement", false)
    }

    fn compare(&self, left: &Tuple, right: &Tuple) -> Ordering {
        for i in 0..self.keys.left.len() {
            let va = left.get(&self.keys.left[i]).unwrap_or(&Value::Null);
            let vb = right.get(&self.keys.right[i]).unwrap_or(&Value::Null);
            let ord = match self.directions[i] {
                SortDirection::Ascending => va.compare(vb),
                SortDirection::Descending => vb.compare(va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Advances the right cursor until its head is >= the left tuple's
    /// key, then reports whether the keys match.
    async fn has_match(&mut self, left: &Tuple) -> StreamResult<bool> {
        loop {
            if self.right_head.is_none() && !self.right_exhausted {
                let t = self.right.read().await?;
                if t.is_eof() {
                    self.right_exhausted = true;
                } else {
                    self.right_head = Some(t);
                }
            }
            let head = match &self.right_head {
                Some(t) => t,
                None => return Ok(false),
            };
            match self.compare(left, head) {
                Ordering::Greater => {
                    self.right_head = None;
                }
                Ordering::Equal => return Ok(true),
                Ordering::Less => return Ok(false),
            }
        }
    }
}

#[async_trait]
impl TupleStream for SetOperationStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.left.open(ctx).await?;
        self.right.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            let tuple = self.left.read().await?;
            if tuple.is_eof() {
                return Ok(tuple);
            }
            if self.has_match(&tuple).await? == self.keep_matches {
                return Ok(tuple);
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.left.close().await?;
        self.right.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        self.left.sort_order()
    }
}

pub(crate) fn construct_intersect(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(SetOperationStream::intersect(node, factory)?))
}

pub(crate) fn construct_complement(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(SetOperationStream::complement(node, factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::stream::{collect, VecStream};
    use std::sync::Arc;

    fn ctx() -> StreamContext {
        StreamContext::new(Arc::new(MemoryBackend::new(1)))
    }

    fn keyed(id: i64, a_i: i64) -> Tuple {
        Tuple::new().with_field("id", id).with_field("a_i", a_i)
    }

    fn set_op(keep_matches: bool, left: Vec<Tuple>, right: Vec<Tuple>) -> SetOperationStream {
        SetOperationStream {
            left: Box::new(VecStream::new(left)),
            right: Box::new(VecStream::new(right)),
            keys: JoinKeys::parse("a_i", "intersect").unwrap(),
            directions: vec![SortDirection::Ascending],
            keep_matches,
            right_head: None,
            right_exhausted: false,
        }
    }

    // left sorted a_i asc: values 0,0,1,2,3,6
    fn left_side() -> Vec<Tuple> {
        vec![
            keyed(0, 0),
            keyed(7, 0),
            keyed(2, 1),
            keyed(3, 2),
            keyed(4, 3),
            keyed(8, 6),
        ]
    }

    // right keys {0, 2, 3, 6}
    fn right_side() -> Vec<Tuple> {
        vec![keyed(100, 0), keyed(101, 2), keyed(102, 3), keyed(103, 6)]
    }

    #[tokio::test]
    async fn test_intersect() {
        let mut stream = set_op(true, left_side(), right_side());
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        let ids: Vec<i64> = tuples.iter().map(|t| t.get_int("id").unwrap()).collect();
        assert_eq!(ids, vec![0, 7, 3, 4, 8]);
    }

    #[tokio::test]
    async fn test_complement() {
        let mut stream = set_op(false, left_side(), right_side());
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        let ids: Vec<i64> = tuples.iter().map(|t| t.get_int("id").unwrap()).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_empty_right_side() {
        let mut intersect = set_op(true, left_side(), vec![]);
        assert!(collect(&mut intersect, &ctx()).await.unwrap().is_empty());
        let mut complement = set_op(false, left_side(), vec![]);
        assert_eq!(collect(&mut complement, &ctx()).await.unwrap().len(), 6);
    }
}
