//! The tuple stream contract
//!
//! Every pipeline stage implements [`TupleStream`]: open once, pull
//! tuples until the EOF marker, close once. Decorators own their
//! children as boxed trait objects; there is no operator hierarchy
//! beyond this trait.

use crate::context::StreamContext;
use crate::error::StreamResult;
use async_trait::async_trait;
use rill_core::{Comparator, Tuple};

/// One pipeline stage: source, decorator, join, aggregation, parallel,
/// daemon, or sink.
///
/// Instances are single-use: `open` → `read`* → `close`. `read` returns
/// the terminal EOF tuple exactly once per upstream sequence; calling it
/// again after EOF yields EOF again. `close` must close all children and,
/// for operators owning background tasks, must not return until those
/// tasks have terminated.
#[async_trait]
pub trait TupleStream: Send {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()>;

    async fn read(&mut self) -> StreamResult<Tuple>;

    async fn close(&mut self) -> StreamResult<()>;

    /// The ordering this stream guarantees on its output, when it
    /// guarantees one. Sort-dependent consumers use this to derive key
    /// directions; it is advisory, not enforced.
    fn sort_order(&self) -> Option<Comparator> {
        None
    }
}

/// Opens the stream, drains it to EOF, closes it, and returns the data
/// tuples in order.
pub async fn collect(
    stream: &mut (dyn TupleStream + '_),
    ctx: &StreamContext,
) -> StreamResult<Vec<Tuple>> {
    stream.open(ctx).await?;
    let mut tuples = Vec::new();
    loop {
        let tuple = stream.read().await?;
        if tuple.is_eof() {
            break;
        }
        tuples.push(tuple);
    }
    stream.close().await?;
    Ok(tuples)
}

/// Replays a buffered tuple sequence. Used by sources for per-shard
/// results and by buffering decorators (sort, rank) for their output
/// phase.
pub struct VecStream {
    tuples: std::vec::IntoIter<Tuple>,
    terminal: Tuple,
    sort: Option<Comparator>,
    finished: bool,
}

impl VecStream {
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self {
            tuples: tuples.into_iter(),
            terminal: Tuple::eof(),
            sort: None,
            finished: false,
        }
    }

    /// Overrides the terminal tuple, preserving upstream EOF metadata.
    pub fn with_terminal(mut self, terminal: Tuple) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_sort(mut self, sort: Comparator) -> Self {
        self.sort = Some(sort);
        self
    }
}

#[async_trait]
impl TupleStream for VecStream {
    async fn open(&mut self, _ctx: &StreamContext) -> StreamResult<()> {
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        match self.tuples.next() {
            Some(t) => Ok(t),
            None => {
                self.finished = true;
                Ok(self.terminal.clone())
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn sort_order(&self) -> Option<Comparator> {
        self.sort.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn ctx() -> StreamContext {
        StreamContext::new(Arc::new(MemoryBackend::new(1)))
    }

    #[tokio::test]
    async fn test_vec_stream_replay() {
        let tuples = vec![
            Tuple::new().with_field("id", 1i64),
            Tuple::new().with_field("id", 2i64),
        ];
        let mut stream = VecStream::new(tuples);
        let out = collect(&mut stream, &ctx()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_int("id"), Some(1));
    }

    #[tokio::test]
    async fn test_vec_stream_eof_is_sticky() {
        let mut stream = VecStream::new(vec![]);
        stream.open(&ctx()).await.unwrap();
        assert!(stream.read().await.unwrap().is_eof());
        assert!(stream.read().await.unwrap().is_eof());
    }

    #[tokio::test]
    async fn test_vec_stream_custom_terminal() {
        let mut stream =
            VecStream::new(vec![]).with_terminal(Tuple::eof().with_field("partial", true));
        stream.open(&ctx()).await.unwrap();
        let t = stream.read().await.unwrap();
        assert!(t.is_eof());
        assert_eq!(t.get("partial"), Some(&rill_core::Value::Bool(true)));
    }
}
