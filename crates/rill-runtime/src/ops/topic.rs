//! Checkpointed topic consumption
//!
//! `topic(collection, q=..., fl=..., id=..., initialCheckpoint=N,
//! rows=N)` reads records with a version stamp above a durable cursor,
//! in version order, capped at `rows` per invocation. After an
//! invocation that returned at least one tuple, the highest seen version
//! is persisted under `id`, so a later run resumes from the last durable
//! position instead of the beginning. Delivery is at-least-once: a crash
//! between consumption and the checkpoint write redelivers the last
//! batch.

use crate::backend::{QueryRequest, SearchBackend, VERSION_FIELD};
use crate::checkpoint::CheckpointStore;
use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{
    collection_arg, fields_param, required_str, u64_param, usize_param, StreamFactory,
};
use crate::stream::{TupleStream, VecStream};
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple};
use tracing::debug;

pub struct TopicStream {
    collection: String,
    filter: String,
    fields: Vec<String>,
    id: String,
    initial_checkpoint: u64,
    rows: usize,
    ctx: Option<StreamContext>,
    inner: Option<VecStream>,
    high_water: u64,
    consumed: usize,
    finished: bool,
}

impl TopicStream {
    pub fn from_expr(node: &ExprNode) -> StreamResult<Self> {
        Ok(Self {
            collection: collection_arg(node, "topic")?,
            filter: node.param("q").unwrap_or("*:*").to_string(),
            fields: fields_param(node, "fl"),
            id: required_str(node, "topic", "id")?.to_string(),
            initial_checkpoint: u64_param(node, "topic", "initialCheckpoint", 0)?,
            rows: usize_param(node, "topic", "rows", 500)?,
            ctx: None,
            inner: None,
            high_water: 0,
            consumed: 0,
            finished: false,
        })
    }
}

#[async_trait]
impl TupleStream for TopicStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        let cursor = ctx
            .checkpoints
            .get(&self.id)
            .await?
            .unwrap_or(self.initial_checkpoint);

        let mut request = QueryRequest::collection(self.collection.clone());
        request.filter = self.filter.clone();
        request.fields = self.fields.clone();
        if !request.fields.is_empty() && !request.fields.iter().any(|f| f == VERSION_FIELD) {
            request.fields.push(VERSION_FIELD.to_string());
        }
        request.sort = Some(
            Comparator::parse(&format!("{} asc", VERSION_FIELD))
                .map_err(|message| StreamError::invalid("topic", "sort", message))?,
        );
        request.after_version = Some(cursor);
        request.rows = Some(self.rows);

        let tuples = ctx.backend.query(&request).await?;
        self.high_water = tuples
            .iter()
            .filter_map(|t| t.get_int(VERSION_FIELD))
            .map(|v| v as u64)
            .max()
            .unwrap_or(cursor);
        debug!(
            topic = %self.id,
            cursor,
            rows = tuples.len(),
            "topic batch read"
        );
        self.inner = Some(VecStream::new(tuples));
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let inner = match &mut self.inner {
            Some(inner) => inner,
            None => return Ok(Tuple::eof()),
        };
        let tuple = inner.read().await?;
        if tuple.is_eof() {
            self.finished = true;
            if self.consumed > 0 {
                let ctx = self
                    .ctx
                    .as_ref()
                    .ok_or_else(|| StreamError::Execution("topic read before open".to_string()))?;
                ctx.checkpoints.put(&self.id, self.high_water).await?;
                debug!(topic = %self.id, cursor = self.high_water, "checkpoint persisted");
            }
        } else {
            self.consumed += 1;
        }
        Ok(tuple)
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.inner = None;
        Ok(())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    _factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(TopicStream::from_expr(node)?))
}
