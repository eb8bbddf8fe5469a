//! Batched mutation sinks: update, delete, commit

use rill_core::Tuple;
use rill_runtime::{
    collect, MemoryBackend, SearchBackend, StreamContext, StreamFactory, VERSION_FIELD,
};
use std::sync::Arc;

fn seeded(collection: &str, docs: usize) -> (StreamContext, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new(1));
    backend.index(
        collection,
        (0..docs)
            .map(|i| {
                Tuple::new()
                    .with_field("id", i as i64)
                    .with_field("a_i", (i * 2) as i64)
            })
            .collect(),
    );
    (StreamContext::new(backend.clone()), backend)
}

async fn run(ctx: &StreamContext, expr: &str) -> Vec<Tuple> {
    let mut stream = StreamFactory::default().construct_str(expr).unwrap();
    collect(stream.as_mut(), ctx).await.unwrap()
}

#[tokio::test]
async fn test_batched_delete_reports_cumulative_counts() {
    let (ctx, backend) = seeded("target", 5);
    let controls = run(
        &ctx,
        "delete(target, batchSize=2, \
         search(target, q=*:*, fl=\"id,_version_\", sort=\"id asc\"))",
    )
    .await;
    let totals: Vec<i64> = controls
        .iter()
        .map(|t| t.get_int("totalIndexed").unwrap())
        .collect();
    assert_eq!(totals, vec![2, 4, 5]);
    assert_eq!(backend.doc_count("target"), 0);
}

#[tokio::test]
async fn test_update_copies_between_collections() {
    let (ctx, backend) = seeded("source", 5);
    let controls = run(
        &ctx,
        "update(dest, batchSize=3, \
         search(source, q=*:*, fl=\"id,a_i,_version_\", sort=\"id asc\"))",
    )
    .await;
    let totals: Vec<i64> = controls
        .iter()
        .map(|t| t.get_int("totalIndexed").unwrap())
        .collect();
    assert_eq!(totals, vec![3, 5]);
    assert_eq!(backend.doc_count("dest"), 5);
}

#[tokio::test]
async fn test_delete_stale_version_is_tolerated_per_record() {
    let (ctx, backend) = seeded("target", 3);
    let controls = run(
        &ctx,
        "delete(target, batchSize=3, \
         list(tuple(id=0, _version_=999999), tuple(id=1), tuple(id=2)))",
    )
    .await;
    // the stale record fails alone; the counter reflects successes
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].get_int("batchIndexed"), Some(2));
    assert_eq!(controls[0].get_int("totalIndexed"), Some(2));
    assert_eq!(backend.doc_count("target"), 1);
}

#[tokio::test]
async fn test_delete_prune_version_field_skips_concurrency_check() {
    let (ctx, backend) = seeded("target", 1);
    let controls = run(
        &ctx,
        "delete(target, batchSize=1, pruneVersionField=true, \
         list(tuple(id=0, _version_=999999)))",
    )
    .await;
    assert_eq!(controls[0].get_int("totalIndexed"), Some(1));
    assert_eq!(backend.doc_count("target"), 0);
}

#[tokio::test]
async fn test_commit_wraps_update_pipeline() {
    let (ctx, backend) = seeded("source", 5);
    let controls = run(
        &ctx,
        "commit(dest, batchSize=2, \
         update(dest, batchSize=1, \
         search(source, q=*:*, fl=\"id,a_i\", sort=\"id asc\")))",
    )
    .await;
    // control tuples pass through commit unchanged
    assert_eq!(controls.len(), 5);
    assert_eq!(controls[4].get_int("totalIndexed"), Some(5));
    // commits after 2 and 4 indexed documents, then once at EOF
    assert_eq!(backend.commit_count(), 3);
    assert_eq!(backend.doc_count("dest"), 5);
}

#[tokio::test]
async fn test_updated_documents_get_fresh_versions() {
    let (ctx, backend) = seeded("source", 2);
    run(
        &ctx,
        "update(dest, batchSize=2, \
         search(source, q=*:*, fl=\"id,a_i,_version_\", sort=\"id asc\"))",
    )
    .await;
    let mut req = rill_runtime::QueryRequest::collection("dest");
    req.filter = "id:0".to_string();
    let dest = backend.query(&req).await.unwrap();
    let mut req = rill_runtime::QueryRequest::collection("source");
    req.filter = "id:0".to_string();
    let source = backend.query(&req).await.unwrap();
    assert_ne!(
        dest[0].get_int(VERSION_FIELD),
        source[0].get_int(VERSION_FIELD)
    );
}
