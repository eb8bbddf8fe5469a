//! N-way sorted merge primitive
//!
//! The single most reused piece of the engine: the multi-shard source,
//! the merge decorator, and the parallel re-merge all delegate here.
//! Given K children already sorted under one comparator, it repeatedly
//! emits the least current head, ties going to the lowest-indexed child.

use crate::context::StreamContext;
use crate::error::StreamResult;
use crate::stream::TupleStream;
use rill_core::{Comparator, Tuple};
use std::cmp::Ordering;

struct MergeSlot {
    stream: Box<dyn TupleStream>,
    head: Option<Tuple>,
}

/// Blocking N-way merge over pre-sorted children. Children's EOF tuples
/// are retained (they may carry metadata such as worker summaries) and
/// exposed once the merge completes.
pub struct SortedMerge {
    slots: Vec<MergeSlot>,
    comparator: Comparator,
    eof_tuples: Vec<Tuple>,
}

impl SortedMerge {
    pub fn new(children: Vec<Box<dyn TupleStream>>, comparator: Comparator) -> Self {
        Self {
            slots: children
                .into_iter()
                .map(|stream| MergeSlot { stream, head: None })
                .collect(),
            comparator,
            eof_tuples: Vec::new(),
        }
    }

    /// Opens every child and primes their heads.
    pub async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        for slot in &mut self.slots {
            slot.stream.open(ctx).await?;
        }
        for i in 0..self.slots.len() {
            self.advance(i).await?;
        }
        Ok(())
    }

    async fn advance(&mut self, index: usize) -> StreamResult<()> {
        let slot = &mut self.slots[index];
        let tuple = slot.stream.read().await?;
        if tuple.is_eof() {
            slot.head = None;
            self.eof_tuples.push(tuple);
        } else {
            slot.head = Some(tuple);
        }
        Ok(())
    }

    /// The next tuple in global order, or EOF once every child is
    /// exhausted.
    pub async fn next(&mut self) -> StreamResult<Tuple> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let head = match &slot.head {
                Some(t) => t,
                None => continue,
            };
            match best {
                None => best = Some(i),
                Some(b) => {
                    let current = self.slots[b].head.as_ref().expect("best head present");
                    if self.comparator.compare(head, current) == Ordering::Less {
                        best = Some(i);
                    }
                }
            }
        }
        match best {
            Some(i) => {
                let tuple = self.slots[i].head.take().expect("selected head present");
                self.advance(i).await?;
                Ok(tuple)
            }
            None => Ok(Tuple::eof()),
        }
    }

    pub async fn close(&mut self) -> StreamResult<()> {
        for slot in &mut self.slots {
            slot.stream.close().await?;
        }
        Ok(())
    }

    /// EOF tuples collected from exhausted children, in exhaustion order.
    pub fn eof_tuples(&self) -> &[Tuple] {
        &self.eof_tuples
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }
}
