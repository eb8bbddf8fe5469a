//! Hash joins
//!
//! The `hashed` side is fully materialized into a keyed multi-map
//! before the left side is read; the left side then streams and probes.
//! Output follows the left side's order, with equal-key groups
//! broadcast as a cross product. Composite probe keys are encoded with
//! length prefixes, so two distinct key tuples can never collide the
//! way naive string concatenation lets them.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{required_str, stream_children, StreamFactory};
use crate::ops::join::{merge_tuples, JoinKeys};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, Tuple};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Length-prefixed composite key: unambiguous across field boundaries.
fn composite_key(tuple: &Tuple, fields: &[String]) -> Option<String> {
    let mut key = String::new();
    for field in fields {
        let text = tuple.get(field)?.to_string();
        key.push_str(&text.len().to_string());
        key.push(':');
        key.push_str(&text);
    }
    Some(key)
}

/// Inner (`keep_unmatched_left = false`) and outer
/// (`keep_unmatched_left = true`) hash join.
pub struct HashJoinStream {
    left: Box<dyn TupleStream>,
    hashed: Box<dyn TupleStream>,
    keys: JoinKeys,
    keep_unmatched_left: bool,
    table: Option<FxHashMap<String, Vec<Tuple>>>,
    ready: VecDeque<Tuple>,
}

impl HashJoinStream {
    fn from_expr(
        node: &ExprNode,
        factory: &StreamFactory,
        op: &str,
        keep_unmatched_left: bool,
    ) -> StreamResult<Self> {
        let keys = JoinKeys::parse(required_str(node, op, "on")?, op)?;
        let hashed_node = node
            .expr_param("hashed")
            .ok_or_else(|| StreamError::missing(op, "hashed"))?;
        let children = stream_children(node, factory);
        let left_node = match children.as_slice() {
            [l] => *l,
            _ => return Err(StreamError::malformed(op, "exactly one nested left stream")),
        };
        Ok(Self {
            left: factory.construct(left_node)?,
            hashed: factory.construct(hashed_node)?,
            keys,
            keep_unmatched_left,
            table: None,
            ready: VecDeque::new(),
        })
    }

    pub fn inner(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "hashJoin", false)
    }

    pub fn outer(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "outerHashJoin", true)
    }
}

#[async_trait]
impl TupleStream for HashJoinStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.hashed.open(ctx).await?;
        let mut table: FxHashMap<String, Vec<Tuple>> = FxHashMap::default();
        loop {
            let tuple = self.hashed.read().await?;
            if tuple.is_eof() {
                break;
            }
            if let Some(key) = composite_key(&tuple, &self.keys.right) {
                table.entry(key).or_default().push(tuple);
            }
        }
        self.hashed.close().await?;
        self.table = Some(table);
        self.left.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Ok(tuple);
            }
            let tuple = self.left.read().await?;
            if tuple.is_eof() {
                return Ok(tuple);
            }
            let table = self
                .table
                .as_ref()
                .ok_or_else(|| StreamError::Execution("hash join read before open".to_string()))?;
            let matches = composite_key(&tuple, &self.keys.left).and_then(|key| table.get(&key));
            match matches {
                Some(group) => {
                    for right in group {
                        self.ready.push_back(merge_tuples(&tuple, right));
                    }
                }
                None if self.keep_unmatched_left => return Ok(tuple),
                None => {}
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.table = None;
        self.ready.clear();
        self.left.close().await
    }
}

pub(crate) fn construct_inner(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(HashJoinStream::inner(node, factory)?))
}

pub(crate) fn construct_outer(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(HashJoinStream::outer(node, factory)?))
}
