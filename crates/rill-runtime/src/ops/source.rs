//! Source operators
//!
//! `shard` targets a single partition of a collection; `search` fans the
//! same query to every shard and re-merges the per-shard results by the
//! declared comparator, so its output guarantee is identical to a single
//! sorted source. Opening is lazy: no backend call happens before
//! `open()`.

use crate::backend::{PartitionSpec, QueryRequest};
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{
    bool_param, collection_arg, comparator_param, fields_param, required_str, StreamFactory,
};
use crate::merge::SortedMerge;
use crate::stream::{TupleStream, VecStream};
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};
use tracing::warn;

/// Query parameters shared by both source variants.
#[derive(Debug, Clone)]
struct SourceSpec {
    collection: String,
    filter: String,
    fields: Vec<String>,
    sort: Comparator,
    partition_keys: Vec<String>,
}

impl SourceSpec {
    fn from_node(node: &ExprNode, op: &str) -> StreamResult<SourceSpec> {
        Ok(SourceSpec {
            collection: collection_arg(node, op)?,
            filter: node.param("q").unwrap_or("*:*").to_string(),
            fields: fields_param(node, "fl"),
            sort: comparator_param(node, op, "sort")?,
            partition_keys: fields_param(node, "partitionKeys"),
        })
    }

    fn request(&self, ctx: &StreamContext, op: &str) -> StreamResult<QueryRequest> {
        let mut request = QueryRequest::collection(self.collection.clone());
        request.filter = self.filter.clone();
        request.fields = self.fields.clone();
        request.sort = Some(self.sort.clone());
        if let Some(slot) = ctx.worker_slot {
            if self.partition_keys.is_empty() {
                return Err(StreamError::missing(op, "partitionKeys"));
            }
            request.partition = Some(PartitionSpec {
                keys: self.partition_keys.clone(),
                worker: slot.worker,
                workers: slot.workers,
            });
        }
        Ok(request)
    }
}

/// Single-shard source: one backend query, replayed in order. Any
/// backend failure fails the open.
pub struct ShardStream {
    spec: SourceSpec,
    shard: String,
    inner: Option<VecStream>,
}

impl ShardStream {
    pub fn from_expr(node: &ExprNode) -> StreamResult<Self> {
        let spec = SourceSpec::from_node(node, "shard")?;
        let shard = required_str(node, "shard", "shard")?.to_string();
        Ok(Self {
            spec,
            shard,
            inner: None,
        })
    }
}

#[async_trait]
impl TupleStream for ShardStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        let mut request = self.spec.request(ctx, "shard")?;
        request.shard = Some(self.shard.clone());
        let tuples = ctx.backend.query(&request).await?;
        self.inner = Some(VecStream::new(tuples));
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        match &mut self.inner {
            Some(inner) => inner.read().await,
            None => Ok(Tuple::eof()),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.inner = None;
        Ok(())
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.spec.sort.clone())
    }
}

/// Multi-shard source: one sub-query per shard, merged back into one
/// globally ordered sequence. In tolerant mode a failing shard is
/// skipped and the terminal tuple is marked partial.
pub struct SearchStream {
    spec: SourceSpec,
    tolerant: bool,
    merge: Option<SortedMerge>,
    partial: bool,
    finished: bool,
}

impl SearchStream {
    pub fn from_expr(node: &ExprNode) -> StreamResult<Self> {
        Ok(Self {
            spec: SourceSpec::from_node(node, "search")?,
            tolerant: bool_param(node, "search", "tolerant", false)?,
            merge: None,
            partial: false,
            finished: false,
        })
    }
}

#[async_trait]
impl TupleStream for SearchStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        let base = self.spec.request(ctx, "search")?;
        let shards = ctx.backend.shards(&self.spec.collection)?;
        let mut children: Vec<Box<dyn TupleStream>> = Vec::with_capacity(shards.len());
        for shard in shards {
            let mut request = base.clone();
            request.shard = Some(shard.clone());
            match ctx.backend.query(&request).await {
                Ok(tuples) => children.push(Box::new(VecStream::new(tuples))),
                Err(err) if self.tolerant => {
                    warn!(
                        collection = %self.spec.collection,
                        shard = %shard,
                        "skipping failed shard: {err}"
                    );
                    self.partial = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
        let mut merge = SortedMerge::new(children, self.spec.sort.clone());
        merge.open(ctx).await?;
        self.merge = Some(merge);
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let merge = match &mut self.merge {
            Some(m) => m,
            None => return Ok(Tuple::eof()),
        };
        let tuple = merge.next().await?;
        if tuple.is_eof() {
            self.finished = true;
            if self.partial {
                return Ok(tuple.with_field("partialResults", true));
            }
        }
        Ok(tuple)
    }

    async fn close(&mut self) -> StreamResult<()> {
        if let Some(mut merge) = self.merge.take() {
            merge.close().await?;
        }
        Ok(())
    }

    fn sort_order(&self) -> Option<Comparator> {
        Some(self.spec.sort.clone())
    }
}

pub(crate) fn construct_search(
    node: &ExprNode,
    _factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(SearchStream::from_expr(node)?))
}

pub(crate) fn construct_shard(
    node: &ExprNode,
    _factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(ShardStream::from_expr(node)?))
}
