//! Fetch decorator: batched key lookup against an external collection
//!
//! For each batch of up to `batchSize` upstream tuples, issues one
//! lookup query for the requested extra fields and joins the results
//! back by key, re-emitting tuples in their original upstream order.

use crate::backend::{QueryRequest, SearchBackend};
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{
    collection_arg, fields_param, required_str, single_stream_child, usize_param, StreamFactory,
};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple, Value};
use std::collections::HashMap;
use std::collections::VecDeque;

pub struct FetchStream {
    collection: String,
    child: Box<dyn TupleStream>,
    /// Upstream key field
    left_key: String,
    /// Key field on the looked-up collection
    right_key: String,
    fields: Vec<String>,
    batch_size: usize,
    ctx: Option<StreamContext>,
    ready: VecDeque<Tuple>,
    terminal: Option<Tuple>,
}

impl FetchStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let on = required_str(node, "fetch", "on")?;
        let (left_key, right_key) = match on.split_once('=') {
            Some((l, r)) => (l.trim().to_string(), r.trim().to_string()),
            None => (on.trim().to_string(), on.trim().to_string()),
        };
        let fields = fields_param(node, "fl");
        if fields.is_empty() {
            return Err(StreamError::missing("fetch", "fl"));
        }
        Ok(Self {
            collection: collection_arg(node, "fetch")?,
            child: single_stream_child(node, "fetch", factory)?,
            left_key,
            right_key,
            fields,
            batch_size: usize_param(node, "fetch", "batchSize", 50)?,
            ctx: None,
            ready: VecDeque::new(),
            terminal: None,
        })
    }

    async fn fill_batch(&mut self) -> StreamResult<()> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            let tuple = self.child.read().await?;
            if tuple.is_eof() {
                self.terminal = Some(tuple);
                break;
            }
            batch.push(tuple);
        }
        if batch.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<Value> = Vec::new();
        for tuple in &batch {
            if let Some(key) = tuple.get(&self.left_key) {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.clone());
                }
            }
        }

        let mut lookup: HashMap<String, Tuple> = HashMap::new();
        if !keys.is_empty() {
            let ctx = self
                .ctx
                .as_ref()
                .ok_or_else(|| StreamError::Execution("fetch read before open".to_string()))?;
            let mut request = QueryRequest::collection(self.collection.clone());
            let mut wanted = self.fields.clone();
            if !wanted.contains(&self.right_key) {
                wanted.push(self.right_key.clone());
            }
            request.fields = wanted;
            request.key_in = Some((self.right_key.clone(), keys));
            for found in ctx.backend.query(&request).await? {
                if let Some(key) = found.get(&self.right_key) {
                    lookup.insert(key.to_string(), found.clone());
                }
            }
        }

        for tuple in batch {
            let enriched = match tuple
                .get(&self.left_key)
                .and_then(|key| lookup.get(&key.to_string()))
            {
                Some(found) => {
                    let mut out = tuple;
                    for field in &self.fields {
                        if let Some(v) = found.get(field) {
                            out = out.with_field(field.clone(), v.clone());
                        }
                    }
                    out
                }
                None => tuple,
            };
            self.ready.push_back(enriched);
        }
        Ok(())
    }
}

#[async_trait]
impl TupleStream for FetchStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.ctx = Some(ctx.clone());
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Ok(tuple);
            }
            if let Some(terminal) = &self.terminal {
                return Ok(terminal.clone());
            }
            self.fill_batch().await?;
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.ready.clear();
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        self.child.sort_order()
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(FetchStream::from_expr(node, factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::stream::{collect, VecStream};
    use std::sync::Arc;

    fn seeded() -> (StreamContext, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(2));
        backend.index(
            "people",
            (0..10)
                .map(|i| {
                    Tuple::new()
                        .with_field("id", i as i64)
                        .with_field("subject", format!("subject {}", i))
                        .with_field("extra", format!("extra {}", i))
                })
                .collect(),
        );
        (StreamContext::new(backend.clone()), backend)
    }

    fn fetch(batch_size: usize, input: Vec<Tuple>) -> FetchStream {
        FetchStream {
            collection: "people".to_string(),
            child: Box::new(VecStream::new(input)),
            left_key: "person".to_string(),
            right_key: "id".to_string(),
            fields: vec!["subject".to_string()],
            batch_size,
            ctx: None,
            ready: VecDeque::new(),
            terminal: None,
        }
    }

    fn upstream() -> Vec<Tuple> {
        (0..10)
            .rev()
            .map(|i| Tuple::new().with_field("person", i as i64))
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_joins_by_key_in_upstream_order() {
        let (ctx, _) = seeded();
        for batch_size in [2, 3, 50] {
            let mut stream = fetch(batch_size, upstream());
            let tuples = collect(&mut stream, &ctx).await.unwrap();
            assert_eq!(tuples.len(), 10);
            for (i, t) in tuples.iter().enumerate() {
                let person = 9 - i as i64;
                assert_eq!(t.get_int("person"), Some(person));
                assert_eq!(
                    t.get_str("subject"),
                    Some(format!("subject {}", person).as_str())
                );
                // only the requested fields come back
                assert!(t.get("extra").is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_leaves_unmatched_tuples_alone() {
        let (ctx, _) = seeded();
        let input = vec![Tuple::new().with_field("person", 99i64)];
        let mut stream = fetch(2, input);
        let tuples = collect(&mut stream, &ctx).await.unwrap();
        assert_eq!(tuples.len(), 1);
        assert!(tuples[0].get("subject").is_none());
    }
}
