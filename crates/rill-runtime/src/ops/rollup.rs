//! Rollup aggregation operators
//!
//! `rollup` is the streaming variant: input sorted by the grouping
//! fields, one open accumulator set, a group tuple emitted on every
//! key change and at EOF. `hashRollup` accepts unsorted input, fully
//! materializes its groups, and emits them in arbitrary order at EOF —
//! callers needing determinism compose an explicit sort downstream.

use crate::aggregate::{Accumulator, AggregateSpec};
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{required_str, stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use indexmap::IndexMap;
use rill_core::{Comparator, ExprNode, Tuple};

const METRIC_NAMES: [&str; 5] = ["sum", "min", "max", "avg", "count"];

fn parse_common(
    node: &ExprNode,
    op: &str,
    factory: &StreamFactory,
) -> StreamResult<(Box<dyn TupleStream>, Vec<String>, Vec<AggregateSpec>)> {
    let over = required_str(node, op, "over")?
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>();
    if over.is_empty() {
        return Err(StreamError::invalid(op, "over", "no grouping fields"));
    }
    let specs = node
        .expr_args()
        .filter(|n| METRIC_NAMES.contains(&n.name.as_str()))
        .map(AggregateSpec::from_node)
        .collect::<StreamResult<Vec<_>>>()?;
    if specs.is_empty() {
        return Err(StreamError::malformed(op, "at least one metric"));
    }
    let children = stream_children(node, factory);
    let child = match children.as_slice() {
        [child] => factory.construct(child)?,
        _ => return Err(StreamError::malformed(op, "exactly one nested stream")),
    };
    Ok((child, over, specs))
}

fn group_tuple(key_source: &Tuple, over: &[String], accumulators: &[Accumulator]) -> Tuple {
    let mut out = Tuple::new();
    for field in over {
        if let Some(v) = key_source.get(field) {
            out = out.with_field(field.clone(), v.clone());
        }
    }
    for acc in accumulators {
        out = out.with_field(acc.title(), acc.value());
    }
    out
}

/// Streaming rollup: one pass, O(1) memory beyond the declared
/// aggregates.
pub struct RollupStream {
    child: Box<dyn TupleStream>,
    over: Vec<String>,
    key: Comparator,
    specs: Vec<AggregateSpec>,
    open_group: Option<(Tuple, Vec<Accumulator>)>,
    terminal: Option<Tuple>,
}

impl RollupStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let (child, over, specs) = parse_common(node, "rollup", factory)?;
        let key = Comparator::parse(&over.join(", "))
            .map_err(|message| StreamError::invalid("rollup", "over", message))?;
        Ok(Self {
            child,
            over,
            key,
            specs,
            open_group: None,
            terminal: None,
        })
    }

    fn fresh_accumulators(&self) -> Vec<Accumulator> {
        self.specs.iter().map(|s| s.accumulator()).collect()
    }
}

#[async_trait]
impl TupleStream for RollupStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if let Some(terminal) = &self.terminal {
            if let Some((key_source, accumulators)) = self.open_group.take() {
                return Ok(group_tuple(&key_source, &self.over, &accumulators));
            }
            return Ok(terminal.clone());
        }
        loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                self.terminal = Some(tuple);
                if let Some((key_source, accumulators)) = self.open_group.take() {
                    return Ok(group_tuple(&key_source, &self.over, &accumulators));
                }
                return Ok(self.terminal.clone().expect("terminal set"));
            }
            match &mut self.open_group {
                Some((key_source, accumulators)) if self.key.same_key(key_source, &tuple) => {
                    for acc in accumulators.iter_mut() {
                        acc.update(&tuple);
                    }
                }
                Some(_) => {
                    // key change closes the open group
                    let (closed_key, closed_accs) =
                        self.open_group.take().expect("open group present");
                    let mut accumulators = self.fresh_accumulators();
                    for acc in accumulators.iter_mut() {
                        acc.update(&tuple);
                    }
                    self.open_group = Some((tuple, accumulators));
                    return Ok(group_tuple(&closed_key, &self.over, &closed_accs));
                }
                None => {
                    let mut accumulators = self.fresh_accumulators();
                    for acc in accumulators.iter_mut() {
                        acc.update(&tuple);
                    }
                    self.open_group = Some((tuple, accumulators));
                }
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.open_group = None;
        self.child.close().await
    }
}

/// Hash rollup: no ordering requirement, all groups materialized,
/// arbitrary output order.
pub struct HashRollupStream {
    child: Box<dyn TupleStream>,
    over: Vec<String>,
    specs: Vec<AggregateSpec>,
    groups: Option<std::vec::IntoIter<Tuple>>,
    terminal: Option<Tuple>,
}

impl HashRollupStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let (child, over, specs) = parse_common(node, "hashRollup", factory)?;
        Ok(Self {
            child,
            over,
            specs,
            groups: None,
            terminal: None,
        })
    }

    fn group_key(&self, tuple: &Tuple) -> String {
        let mut key = String::new();
        for field in &self.over {
            if let Some(v) = tuple.get(field) {
                key.push_str(&v.to_string());
            }
            key.push('\u{1f}');
        }
        key
    }

    async fn materialize(&mut self) -> StreamResult<()> {
        let mut groups: IndexMap<String, (Tuple, Vec<Accumulator>)> = IndexMap::new();
        let terminal = loop {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                break tuple;
            }
            let key = self.group_key(&tuple);
            let entry = groups.entry(key).or_insert_with(|| {
                let accumulators = self.specs.iter().map(|s| s.accumulator()).collect();
                (tuple.clone(), accumulators)
            });
            for acc in entry.1.iter_mut() {
                acc.update(&tuple);
            }
        };
        let emitted: Vec<Tuple> = groups
            .into_values()
            .map(|(key_source, accumulators)| group_tuple(&key_source, &self.over, &accumulators))
            .collect();
        self.groups = Some(emitted.into_iter());
        self.terminal = Some(terminal);
        Ok(())
    }
}

#[async_trait]
impl TupleStream for HashRollupStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.groups.is_none() {
            self.materialize().await?;
        }
        match self.groups.as_mut().expect("groups materialized").next() {
            Some(tuple) => Ok(tuple),
            None => Ok(self.terminal.clone().unwrap_or_else(Tuple::eof)),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.groups = None;
        self.child.close().await
    }
}

pub(crate) fn construct_streaming(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(RollupStream::from_expr(node, factory)?))
}

pub(crate) fn construct_hashed(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(HashRollupStream::from_expr(node, factory)?))
}
