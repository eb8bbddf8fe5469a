//! Sort-merge joins
//!
//! Both inputs must already be sorted by the join keys, in the same
//! direction. Runs of equal keys are buffered on each side and their
//! cross product emitted before both cursors advance, so the cost is
//! O(n+m) plus any single key's cross product. Join keys may be named
//! differently per side (`on="left_f=right_f"`).

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{required_str, stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, SortDirection, Tuple, Value};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Paired join-key fields: `on="a=b, c=d"`; a bare `on="a"` joins the
/// same name on both sides.
#[derive(Debug, Clone)]
pub(crate) struct JoinKeys {
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl JoinKeys {
    pub(crate) fn parse(text: &str, op: &str) -> StreamResult<JoinKeys> {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((l, r)) => {
                    left.push(l.trim().to_string());
                    right.push(r.trim().to_string());
                }
                None => {
                    left.push(part.to_string());
                    right.push(part.to_string());
                }
            }
        }
        if left.is_empty() {
            return Err(StreamError::invalid(op, "on", "no join keys"));
        }
        Ok(JoinKeys { left, right })
    }
}

/// Key comparison directions, taken from the left input's declared sort
/// so that descending-sorted inputs join correctly. Ascending when the
/// input declares nothing.
fn key_directions(keys: &JoinKeys, left_order: Option<Comparator>) -> Vec<SortDirection> {
    keys.left
        .iter()
        .map(|field| {
            left_order
                .as_ref()
                .and_then(|order| {
                    order
                        .fields
                        .iter()
                        .find(|sf| &sf.field == field)
                        .map(|sf| sf.direction)
                })
                .unwrap_or(SortDirection::Ascending)
        })
        .collect()
}

fn compare_keys(
    left: &Tuple,
    right: &Tuple,
    keys: &JoinKeys,
    directions: &[SortDirection],
) -> Ordering {
    for i in 0..keys.left.len() {
        let va = left.get(&keys.left[i]).unwrap_or(&Value::Null);
        let vb = right.get(&keys.right[i]).unwrap_or(&Value::Null);
        let ord = match directions[i] {
            SortDirection::Ascending => va.compare(vb),
            SortDirection::Descending => vb.compare(va),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Clones the left tuple and lays the right side's fields over it.
pub(crate) fn merge_tuples(left: &Tuple, right: &Tuple) -> Tuple {
    let mut out = left.clone();
    for (k, v) in &right.fields {
        out.fields.insert(k.clone(), v.clone());
    }
    out
}

/// Pull cursor that yields whole runs of equal-keyed tuples.
struct RunReader {
    stream: Box<dyn TupleStream>,
    pending: Option<Tuple>,
    exhausted: bool,
}

impl RunReader {
    fn new(stream: Box<dyn TupleStream>) -> Self {
        Self {
            stream,
            pending: None,
            exhausted: false,
        }
    }

    /// The next run of tuples equal on `fields`, or `None` at EOF.
    async fn next_run(&mut self, fields: &[String]) -> StreamResult<Option<Vec<Tuple>>> {
        if self.exhausted {
            return Ok(None);
        }
        let first = match self.pending.take() {
            Some(t) => t,
            None => {
                let t = self.stream.read().await?;
                if t.is_eof() {
                    self.exhausted = true;
                    return Ok(None);
                }
                t
            }
        };
        let mut run = vec![first];
        loop {
            let t = self.stream.read().await?;
            if t.is_eof() {
                self.exhausted = true;
                break;
            }
            let same = fields.iter().all(|f| {
                let a = run[0].get(f).unwrap_or(&Value::Null);
                let b = t.get(f).unwrap_or(&Value::Null);
                a.compare(b) == Ordering::Equal
            });
            if same {
                run.push(t);
            } else {
                self.pending = Some(t);
                break;
            }
        }
        Ok(Some(run))
    }
}

/// Inner (`emit_unmatched_left = false`) and left-outer
/// (`emit_unmatched_left = true`) sort-merge join.
pub struct MergeJoinStream {
    left: RunReader,
    right: RunReader,
    keys: JoinKeys,
    directions: Vec<SortDirection>,
    emit_unmatched_left: bool,
    left_run: Option<Vec<Tuple>>,
    right_run: Option<Vec<Tuple>>,
    ready: VecDeque<Tuple>,
    finished: bool,
}

impl MergeJoinStream {
    fn from_expr(
        node: &ExprNode,
        factory: &StreamFactory,
        op: &str,
        emit_unmatched_left: bool,
    ) -> StreamResult<Self> {
        let keys = JoinKeys::parse(required_str(node, op, "on")?, op)?;
        let children = stream_children(node, factory);
        let (left_node, right_node) = match children.as_slice() {
            [l, r] => (*l, *r),
            _ => return Err(StreamError::malformed(op, "exactly two nested streams")),
        };
        let left = factory.construct(left_node)?;
        let right = factory.construct(right_node)?;
        let directions = key_directions(&keys, left.sort_order());
        Ok(Self {
            left: RunReader::new(left),
            right: RunReader::new(right),
            keys,
            directions,
            emit_unmatched_left,
            left_run: None,
            right_run: None,
            ready: VecDeque::new(),
            finished: false,
        })
    }

    pub fn inner(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "innerJoin", false)
    }

    pub fn left_outer(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        Self::from_expr(node, factory, "leftOuterJoin", true)
    }

    async fn advance(&mut self) -> StreamResult<()> {
        loop {
            if self.left_run.is_none() {
                self.left_run = self.left.next_run(&self.keys.left).await?;
            }
            let left_run = match &self.left_run {
                Some(run) => run,
                None => {
                    self.finished = true;
                    return Ok(());
                }
            };
            if self.right_run.is_none() {
                self.right_run = self.right.next_run(&self.keys.right).await?;
            }
            let right_run = match &self.right_run {
                Some(run) => run,
                None => {
                    // right side exhausted
                    if self.emit_unmatched_left {
                        self.ready.extend(self.left_run.take().expect("left run"));
                        return Ok(());
                    }
                    self.finished = true;
                    return Ok(());
                }
            };
            match compare_keys(&left_run[0], &right_run[0], &self.keys, &self.directions) {
                Ordering::Less => {
                    let run = self.left_run.take().expect("left run");
                    if self.emit_unmatched_left {
                        self.ready.extend(run);
                        return Ok(());
                    }
                }
                Ordering::Greater => {
                    self.right_run = None;
                }
                Ordering::Equal => {
                    let left_run = self.left_run.take().expect("left run");
                    let right_run = self.right_run.take().expect("right run");
                    for l in &left_run {
                        for r in &right_run {
                            self.ready.push_back(merge_tuples(l, r));
                        }
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl TupleStream for MergeJoinStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.left.stream.open(ctx).await?;
        self.right.stream.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Ok(tuple);
            }
            if self.finished {
                return Ok(Tuple::eof());
            }
            self.advance().await?;
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.ready.clear();
        self.left.stream.close().await?;
        self.right.stream.close().await
    }
}

pub(crate) fn construct_inner(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(MergeJoinStream::inner(node, factory)?))
}

pub(crate) fn construct_left_outer(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(MergeJoinStream::left_outer(node, factory)?))
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

    fn left_tuple(id: i64, j1: i64, j2: &str, ident: &str) -> Tuple {
        Tuple::new()
            .with_field("id", id)
            .with_field("join1_i", j1)
            .with_field("join2_s", j2)
            .with_field("ident_s", ident)
    }

    fn right_tuple(j1: i64, j2: &str, ident: &str) -> Tuple {
        Tuple::new()
            .with_field("join1_i", j1)
            .with_field("join2_s", j2)
            .with_field("ident_s", ident)
    }

    // both sorted join1_i asc, join2_s asc
    fn left_side() -> Vec<Tuple> {
        vec![
            left_tuple(1, 0, "a", "left_1"),
            left_tuple(15, 0, "a", "left_1"),
            left_tuple(2, 0, "b", "left_2"),
            left_tuple(3, 1, "a", "left_3"),
            left_tuple(4, 1, "b", "left_4"),
            left_tuple(5, 1, "c", "left_5"),
            left_tuple(6, 2, "d", "left_6"),
            left_tuple(7, 3, "e", "left_7"),
        ]
    }

    fn right_side() -> Vec<Tuple> {
        vec![
            right_tuple(0, "a", "right_1"),
            right_tuple(0, "a", "right_2"),
            right_tuple(1, "a", "right_3"),
            right_tuple(1, "b", "right_4"),
            right_tuple(1, "c", "right_5"),
            right_tuple(2, "dad", "right_6"),
            right_tuple(3, "e", "right_7"),
        ]
    }

    fn join(emit_unmatched_left: bool, left: Vec<Tuple>, right: Vec<Tuple>) -> MergeJoinStream {
        let keys = JoinKeys::parse("join1_i=join1_i, join2_s=join2_s", "innerJoin").unwrap();
        let directions = vec![SortDirection::Ascending, SortDirection::Ascending];
        MergeJoinStream {
            left: RunReader::new(Box::new(VecStream::new(left))),
            right: RunReader::new(Box::new(VecStream::new(right))),
            keys,
            directions,
            emit_unmatched_left,
            left_run: None,
            right_run: None,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    #[tokio::test]
    async fn test_inner_join() {
        let mut stream = join(false, left_side(), right_side());
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        let ids: Vec<i64> = tuples.iter().map(|t| t.get_int("id").unwrap()).collect();
        assert_eq!(ids, vec![1, 1, 15, 15, 3, 4, 5, 7]);
        // right fields overlay left on collisions
        assert_eq!(tuples[0].get_str("ident_s"), Some("right_1"));
    }

    #[tokio::test]
    async fn test_inner_join_no_matches() {
        let right = vec![right_tuple(7, "z", "right_x")];
        let mut stream = join(false, left_side(), right);
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert!(tuples.is_empty());
    }

    #[tokio::test]
    async fn test_left_outer_join() {
        let mut stream = join(true, left_side(), right_side());
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        let ids: Vec<i64> = tuples.iter().map(|t| t.get_int("id").unwrap()).collect();
        // unmatched ids 2 and 6 survive in stream order
        assert_eq!(ids, vec![1, 1, 15, 15, 2, 3, 4, 5, 6, 7]);
        // the unmatched tuple keeps only its left fields
        let unmatched = tuples.iter().find(|t| t.get_int("id") == Some(6)).unwrap();
        assert_eq!(unmatched.get_str("ident_s"), Some("left_6"));
    }

    #[tokio::test]
    async fn test_inner_join_equals_nested_loop_join() {
        // randomized-ish key mix, compared against the naive quadratic join
        let left: Vec<Tuple> = [0, 0, 1, 2, 2, 2, 5, 7]
            .iter()
            .enumerate()
            .map(|(i, k)| Tuple::new().with_field("id", i as i64).with_field("k", *k as i64))
            .collect();
        let right: Vec<Tuple> = [0, 2, 2, 3, 5, 5, 8]
            .iter()
            .map(|k| Tuple::new().with_field("k", *k as i64))
            .collect();

        let mut expected = 0;
        for l in &left {
            for r in &right {
                if l.get_int("k") == r.get_int("k") {
                    expected += 1;
                }
            }
        }

        let keys = JoinKeys::parse("k", "innerJoin").unwrap();
        let mut stream = MergeJoinStream {
            left: RunReader::new(Box::new(VecStream::new(left))),
            right: RunReader::new(Box::new(VecStream::new(right))),
            directions: vec![SortDirection::Ascending],
            keys,
            emit_unmatched_left: false,
            left_run: None,
            right_run: None,
            ready: VecDeque::new(),
            finished: false,
        };
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(tuples.len(), expected);
    }

    #[tokio::test]
    async fn test_descending_inputs() {
        let mut left = left_side();
        left.reverse();
        let mut right = right_side();
        right.reverse();
        let keys = JoinKeys::parse("join1_i=join1_i, join2_s=join2_s", "innerJoin").unwrap();
        let mut stream = MergeJoinStream {
            left: RunReader::new(Box::new(VecStream::new(left))),
            right: RunReader::new(Box::new(VecStream::new(right))),
            directions: vec![SortDirection::Descending, SortDirection::Descending],
            keys,
            emit_unmatched_left: false,
            left_run: None,
            right_run: None,
            ready: VecDeque::new(),
            finished: false,
        };
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(tuples.len(), 8);
    }

    #[test]
    fn test_join_keys_parse() {
        let keys = JoinKeys::parse("a=b, c", "innerJoin").unwrap();
        assert_eq!(keys.left, vec!["a", "c"]);
        assert_eq!(keys.right, vec!["b", "c"]);
        assert!(JoinKeys::parse("  ", "innerJoin").is_err());
    }
}
