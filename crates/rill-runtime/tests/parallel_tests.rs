//! Partitioned parallel execution across worker tasks

use rill_core::{Comparator, Tuple};
use rill_runtime::ops::parallel::ParallelStream;
use rill_runtime::{collect, MemoryBackend, StreamContext, StreamFactory, TupleStream};
use std::sync::Arc;

fn seeded(shards: usize, docs: usize) -> StreamContext {
    let backend = MemoryBackend::new(shards);
    backend.index(
        "logs",
        (0..docs)
            .map(|i| {
                Tuple::new()
                    .with_field("id", i as i64)
                    .with_field("a_f", (i % 7) as f64)
            })
            .collect(),
    );
    StreamContext::new(Arc::new(backend))
}

fn parallel_expr(workers: usize, inner: &str) -> String {
    format!(
        "parallel(logs, workers={}, sort=\"a_f asc, id asc\", {})",
        workers, inner
    )
}

const INNER_SEARCH: &str =
    "search(logs, q=*:*, fl=\"id,a_f\", sort=\"a_f asc, id asc\", partitionKeys=id)";

#[tokio::test]
async fn test_parallel_matches_serial_execution() {
    let ctx = seeded(2, 50);
    let factory = StreamFactory::default();

    let mut serial = factory.construct_str(INNER_SEARCH).unwrap();
    let expected = collect(serial.as_mut(), &ctx).await.unwrap();

    for workers in [1, 2, 5] {
        let mut stream = factory
            .construct_str(&parallel_expr(workers, INNER_SEARCH))
            .unwrap();
        let tuples = collect(stream.as_mut(), &ctx).await.unwrap();
        assert_eq!(tuples.len(), expected.len());
        assert_eq!(tuples, expected);
    }
}

#[tokio::test]
async fn test_parallel_output_is_globally_sorted() {
    let ctx = seeded(3, 60);
    let factory = StreamFactory::default();
    let mut stream = factory
        .construct_str(&parallel_expr(4, INNER_SEARCH))
        .unwrap();
    let tuples = collect(stream.as_mut(), &ctx).await.unwrap();
    let order = Comparator::parse("a_f asc, id asc").unwrap();
    for pair in tuples.windows(2) {
        assert_ne!(
            order.compare(&pair[0], &pair[1]),
            std::cmp::Ordering::Greater
        );
    }
}

#[tokio::test]
async fn test_parallel_collects_one_eof_per_worker() {
    let ctx = seeded(2, 30);
    let factory = StreamFactory::default();
    for workers in [1, 3, 6] {
        let node = rill_parser::parse(&parallel_expr(workers, INNER_SEARCH)).unwrap();
        let mut stream = ParallelStream::from_expr(&node, &factory).unwrap();
        stream.open(&ctx).await.unwrap();
        loop {
            if stream.read().await.unwrap().is_eof() {
                break;
            }
        }
        assert_eq!(stream.eof_tuples().len(), workers);
        stream.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_parallel_null_summaries_cover_collection() {
    // each worker drains its partition into a single summary tuple; the
    // counts must add up to the whole collection
    let ctx = seeded(2, 40);
    let factory = StreamFactory::default();
    let inner = format!("null({}, by=\"nullCount asc\")", INNER_SEARCH);
    let node = rill_parser::parse(&format!(
        "parallel(logs, workers=4, sort=\"nullCount asc\", {})",
        inner
    ))
    .unwrap();
    let mut stream = ParallelStream::from_expr(&node, &factory).unwrap();
    let summaries = collect(&mut stream, &ctx).await.unwrap();
    assert_eq!(summaries.len(), 4);
    let total: i64 = summaries.iter().map(|t| t.get_int("nullCount").unwrap()).sum();
    assert_eq!(total, 40);
}

#[tokio::test]
async fn test_parallel_unique_with_partition_aligned_keys() {
    // partitioning on the distinct key keeps every equal-key run inside
    // one worker, so the parallel result equals the serial one
    let ctx = seeded(2, 30);
    let factory = StreamFactory::default();
    let inner = "unique(search(logs, q=*:*, fl=\"id,a_f\", sort=\"a_f asc, id asc\", \
                 partitionKeys=a_f), over=\"a_f\")";

    let mut serial = factory
        .construct_str("unique(search(logs, q=*:*, fl=\"id,a_f\", sort=\"a_f asc, id asc\"), over=\"a_f\")")
        .unwrap();
    let expected = collect(serial.as_mut(), &ctx).await.unwrap();

    let mut stream = factory.construct_str(&parallel_expr(3, inner)).unwrap();
    let tuples = collect(stream.as_mut(), &ctx).await.unwrap();
    assert_eq!(tuples, expected);
}
