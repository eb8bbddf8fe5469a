//! Cartesian expansion decorator
//!
//! Expands list-valued fields into the cross product of their single
//! values, one output tuple per combination. A tuple without the listed
//! field passes through unchanged. `productSort` orders each tuple's
//! expansion batch.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{optional_comparator, single_stream_child, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple, Value};
use std::collections::VecDeque;

pub struct CartesianProductStream {
    child: Box<dyn TupleStream>,
    selectors: Vec<String>,
    product_sort: Option<Comparator>,
    ready: VecDeque<Tuple>,
}

impl CartesianProductStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let selectors: Vec<String> = node.ident_args().map(|s| s.to_string()).collect();
        if selectors.is_empty() {
            return Err(StreamError::malformed(
                "cartesian",
                "at least one field to expand",
            ));
        }
        Ok(Self {
            child: single_stream_child(node, "cartesian", factory)?,
            selectors,
            product_sort: optional_comparator(node, "cartesian", "productSort")?,
            ready: VecDeque::new(),
        })
    }

    fn expand(&self, tuple: Tuple) -> Vec<Tuple> {
        let mut batch = vec![tuple];
        for selector in &self.selectors {
            let mut next = Vec::with_capacity(batch.len());
            for t in batch {
                match t.get(selector).cloned() {
                    Some(Value::List(items)) => {
                        for item in items {
                            let mut expanded = t.clone();
                            expanded.fields.insert(selector.clone(), item);
                            next.push(expanded);
                        }
                    }
                    _ => next.push(t),
                }
            }
            batch = next;
        }
        if let Some(sort) = &self.product_sort {
            batch.sort_by(|a, b| sort.compare(a, b));
        }
        batch
    }
}

#[async_trait]
impl TupleStream for CartesianProductStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Ok(tuple);
            }
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                return Ok(tuple);
            }
            self.ready.extend(self.expand(tuple));
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.ready.clear();
        self.child.close().await
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(CartesianProductStream::from_expr(node, factory)?))
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

    fn input() -> Vec<Tuple> {
        vec![
            Tuple::new()
                .with_field("id", 0i64)
                .with_field("a_ss", vec!["a", "b", "c", "d", "e"])
                .with_field("b_ls", vec![1i64, 2, 3]),
            Tuple::new()
                .with_field("id", 1i64)
                .with_field("a_ss", vec!["a", "b", "c", "d", "e"]),
        ]
    }

    fn cartesian(selectors: &[&str], product_sort: Option<&str>) -> CartesianProductStream {
        CartesianProductStream {
            child: Box::new(VecStream::new(input())),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            product_sort: product_sort.map(|s| Comparator::parse(s).unwrap()),
            ready: VecDeque::new(),
        }
    }

    #[tokio::test]
    async fn test_single_selector() {
        let mut stream = cartesian(&["a_ss"], None);
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(tuples.len(), 10);
        assert_eq!(tuples[0].get_str("a_ss"), Some("a"));
        assert_eq!(tuples[2].get_str("a_ss"), Some("c"));
        assert_eq!(tuples[5].get_str("a_ss"), Some("a"));
        assert_eq!(tuples[7].get_str("a_ss"), Some("c"));
    }

    #[tokio::test]
    async fn test_single_selector_sorted_descending() {
        let mut stream = cartesian(&["a_ss"], Some("a_ss desc"));
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(tuples[0].get_str("a_ss"), Some("e"));
        assert_eq!(tuples[2].get_str("a_ss"), Some("c"));
    }

    #[tokio::test]
    async fn test_multi_selector_cross_product() {
        let mut stream = cartesian(&["a_ss", "b_ls"], Some("a_ss asc"));
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        // (5 * 3) + 5: the second tuple has no b_ls list
        assert_eq!(tuples.len(), 20);
        assert_eq!(tuples[0].get_str("a_ss"), Some("a"));
        assert_eq!(tuples[0].get_int("b_ls"), Some(1));
        assert_eq!(tuples[3].get_str("a_ss"), Some("b"));
        assert_eq!(tuples[3].get_int("b_ls"), Some(1));
        assert!(tuples[15].get("b_ls").is_none());
    }

    #[tokio::test]
    async fn test_inner_sort_on_second_selector() {
        let mut stream = cartesian(&["a_ss", "b_ls"], Some("a_ss asc, b_ls desc"));
        let tuples = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(tuples[0].get_int("b_ls"), Some(3));
        assert_eq!(tuples[1].get_int("b_ls"), Some(2));
        assert_eq!(tuples[2].get_int("b_ls"), Some(1));
        assert_eq!(tuples[3].get_str("a_ss"), Some("b"));
    }
}
