//! Grouping reduce decorator
//!
//! Input must be sorted by the `by` fields. Buffers one group at a time
//! and emits, per group, the group's first tuple extended with a `group`
//! field: the group's tuples re-sorted by the group operation's
//! comparator and capped at its `n`.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{comparator_param, required_str, stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple, Value};

/// The `group(sort=..., n=...)` operation applied to each closed group.
#[derive(Debug, Clone)]
struct GroupOperation {
    sort: Comparator,
    n: usize,
}

impl GroupOperation {
    fn from_node(node: &ExprNode) -> StreamResult<GroupOperation> {
        let sort = comparator_param(node, "group", "sort")?;
        let n = required_str(node, "group", "n")?
            .parse::<usize>()
            .map_err(|_| StreamError::invalid("group", "n", "not a count"))?;
        Ok(GroupOperation { sort, n })
    }

    fn emit(&self, mut members: Vec<Tuple>) -> Tuple {
        let head = members[0].clone();
        members.sort_by(|a, b| self.sort.compare(a, b));
        members.truncate(self.n);
        let grouped: Vec<Value> = members.iter().map(|t| t.to_map()).collect();
        head.with_field("group", Value::List(grouped))
    }
}

pub struct ReducerStream {
    child: Box<dyn TupleStream>,
    by: Comparator,
    operation: GroupOperation,
    current: Vec<Tuple>,
    terminal: Option<Tuple>,
}

impl ReducerStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let by_text = required_str(node, "reduce", "by")?;
        let by = Comparator::parse(by_text)
            .map_err(|message| StreamError::invalid("reduce", "by", message))?;
        let group_node = node
            .expr_args_named("group")
            .next()
            .ok_or_else(|| StreamError::malformed("reduce", "a group(sort, n) operation"))?;
        let operation = GroupOperation::from_node(group_node)?;
        let children = stream_children(node, factory);
        let child = match children.as_slice() {
            [child] => factory.construct(child)?,
            _ => return Err(StreamError::malformed("reduce", "exactly one nested stream")),
        };
        Ok(Self {
            child,
            by,
            operation,
            current: Vec::new(),
            terminal: None,
        })
    }
}

#[async_trait]
impl TupleStream for ReducerStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if let Some(terminal) = &self.terminal {
            // final group already flushed
            if self.current.is_empty() {
                return Ok(terminal.clone());
            }
            let group = std::mem::take(&mut self.current);
            return Ok(self.operation.emit(group));
        }
        loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                self.terminal = Some(tuple);
                if self.current.is_empty() {
                    return Ok(self.terminal.clone().expect("terminal set"));
                }
                let group = std::mem::take(&mut self.current);
                return Ok(self.operation.emit(group));
            }
            let same_group = self
                .current
                .first()
                .map(|head| self.by.same_key(head, &tuple))
                .unwrap_or(true);
            if same_group {
                self.current.push(tuple);
                continue;
            }
            let group = std::mem::replace(&mut self.current, vec![tuple]);
            return Ok(self.operation.emit(group));
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.current.clear();
        self.child.close().await
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(ReducerStream::from_expr(node, factory)?))
}
