//! Search backend interface
//!
//! The engine never talks to storage directly; it issues [`QueryRequest`]s
//! against a [`SearchBackend`] and receives tuples already sorted per the
//! request. [`MemoryBackend`] is the in-memory implementation used by
//! tests and embedded pipelines: versioned documents, hash sharding,
//! optimistic concurrency, and per-record tolerant mutations.

use async_trait::async_trait;
use rill_core::{Comparator, Tuple, Value};
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Version stamp field carried by stored documents.
pub const VERSION_FIELD: &str = "_version_";

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("collection '{0}' not found")]
    UnknownCollection(String),

    #[error("shard '{shard}' of '{collection}' failed: {message}")]
    Shard {
        collection: String,
        shard: String,
        message: String,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("mutation failed: {0}")]
    Mutation(String),
}

/// Hash-partition slot assigned to one parallel worker: the worker only
/// sees records with `hash(keys) % workers == worker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub keys: Vec<String>,
    pub worker: usize,
    pub workers: usize,
}

/// One query against a collection or a single shard of it.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub collection: String,
    /// Restricts the query to one shard; `None` queries all documents.
    pub shard: Option<String>,
    /// Filter text: `*:*` or `field:value`.
    pub filter: String,
    /// Fields to return; empty returns every stored field.
    pub fields: Vec<String>,
    pub sort: Option<Comparator>,
    /// Hash-partition restriction for parallel workers.
    pub partition: Option<PartitionSpec>,
    /// Batched key lookup: only records whose field matches one of the
    /// given values. Used by the fetch operator.
    pub key_in: Option<(String, Vec<Value>)>,
    /// Only records with a version strictly greater than this. Used by
    /// checkpointed topic consumption.
    pub after_version: Option<u64>,
    /// Row cap applied after sorting.
    pub rows: Option<usize>,
}

impl QueryRequest {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: "*:*".to_string(),
            ..Default::default()
        }
    }
}

/// One record of a bulk mutation batch.
#[derive(Debug, Clone)]
pub enum MutationOp {
    Add { doc: Tuple },
    Delete { key: Value, version: Option<i64> },
}

/// Per-batch mutation result. With a tolerant backend, individual
/// rejections (stale versions, unknown keys) are recorded here while the
/// rest of the batch is applied.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub accepted: usize,
    pub rejected: Vec<RejectedOp>,
}

#[derive(Debug, Clone)]
pub struct RejectedOp {
    pub key: String,
    pub reason: String,
}

/// External search/storage collaborator.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Shard names of a collection, in a stable order.
    fn shards(&self, collection: &str) -> Result<Vec<String>, BackendError>;

    /// Executes a query; the result is sorted per `request.sort`.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Tuple>, BackendError>;

    /// Applies a batch of add/delete operations.
    async fn mutate(
        &self,
        collection: &str,
        ops: &[MutationOp],
    ) -> Result<MutationOutcome, BackendError>;

    /// Makes pending mutations visible to queries.
    async fn commit(&self, collection: &str, wait_searcher: bool) -> Result<(), BackendError>;
}

/// Stable hash of the named fields' values, used for worker partitioning
/// and shard routing. FxHasher has no random state, so every worker in a
/// process computes identical assignments.
pub fn partition_hash(tuple: &Tuple, keys: &[String]) -> u64 {
    let mut hasher = FxHasher::default();
    for key in keys {
        match tuple.get(key) {
            Some(v) => v.to_string().hash(&mut hasher),
            None => "".hash(&mut hasher),
        }
    }
    hasher.finish()
}

/// In-memory backend: documents keyed by their `id` field, spread over a
/// fixed shard count by hash of the key. Every accepted add or delete
/// bumps a global version counter; adds stamp the document's
/// `_version_` field.
pub struct MemoryBackend {
    shard_count: usize,
    tolerant: bool,
    collections: RwLock<HashMap<String, CollectionData>>,
    versions: AtomicU64,
    commits: AtomicUsize,
    queries: AtomicUsize,
    failing_shards: RwLock<Vec<(String, String)>>,
}

#[derive(Default)]
struct CollectionData {
    docs: HashMap<String, Tuple>,
}

impl MemoryBackend {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count: shard_count.max(1),
            tolerant: true,
            collections: RwLock::new(HashMap::new()),
            versions: AtomicU64::new(0),
            commits: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            failing_shards: RwLock::new(Vec::new()),
        }
    }

    /// Disables per-record tolerance: the first version conflict fails
    /// the whole batch.
    pub fn strict(mut self) -> Self {
        self.tolerant = false;
        self
    }

    /// Marks one shard as failing, for tolerant-mode tests.
    pub fn fail_shard(&self, collection: &str, shard: &str) {
        self.failing_shards
            .write()
            .expect("failing_shards lock poisoned")
            .push((collection.to_string(), shard.to_string()));
    }

    /// Number of commits observed.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of queries served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Seeds documents directly; each must carry an `id` field.
    pub fn index(&self, collection: &str, docs: Vec<Tuple>) {
        let mut collections = self.collections.write().expect("collections lock poisoned");
        let data = collections.entry(collection.to_string()).or_default();
        for doc in docs {
            let key = doc
                .get("id")
                .map(|v| v.to_string())
                .unwrap_or_default();
            let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
            let stamped = doc.with_field(VERSION_FIELD, version as i64);
            data.docs.insert(key, stamped);
        }
    }

    pub fn doc_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("collections lock poisoned")
            .get(collection)
            .map(|d| d.docs.len())
            .unwrap_or(0)
    }

    fn shard_of(&self, key: &str) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.shard_count as u64) as usize
    }

    fn matches_filter(doc: &Tuple, filter: &str) -> bool {
        let filter = filter.trim();
        if filter.is_empty() || filter == "*:*" {
            return true;
        }
        match filter.split_once(':') {
            Some((field, expected)) => doc
                .get(field)
                .map(|v| v.to_string() == expected)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    fn shards(&self, collection: &str) -> Result<Vec<String>, BackendError> {
        let collections = self.collections.read().expect("collections lock poisoned");
        if !collections.contains_key(collection) {
            return Err(BackendError::UnknownCollection(collection.to_string()));
        }
        Ok((1..=self.shard_count)
            .map(|i| format!("shard{}", i))
            .collect())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<Tuple>, BackendError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(shard) = &request.shard {
            let failing = self
                .failing_shards
                .read()
                .expect("failing_shards lock poisoned");
            if failing
                .iter()
                .any(|(c, s)| c == &request.collection && s == shard)
            {
                return Err(BackendError::Shard {
                    collection: request.collection.clone(),
                    shard: shard.clone(),
                    message: "shard unavailable".to_string(),
                });
            }
        }

        let collections = self.collections.read().expect("collections lock poisoned");
        let data = collections
            .get(&request.collection)
            .ok_or_else(|| BackendError::UnknownCollection(request.collection.clone()))?;

        let shard_index = match &request.shard {
            Some(name) => Some(
                name.strip_prefix("shard")
                    .and_then(|n| n.parse::<usize>().ok())
                    .map(|n| n - 1)
                    .ok_or_else(|| BackendError::Query(format!("unknown shard '{}'", name)))?,
            ),
            None => None,
        };

        let mut results: Vec<Tuple> = Vec::new();
        for (key, doc) in &data.docs {
            if let Some(idx) = shard_index {
                if self.shard_of(key) != idx {
                    continue;
                }
            }
            if !Self::matches_filter(doc, &request.filter) {
                continue;
            }
            if let Some(spec) = &request.partition {
                let slot = partition_hash(doc, &spec.keys) % spec.workers as u64;
                if slot != spec.worker as u64 {
                    continue;
                }
            }
            if let Some((field, values)) = &request.key_in {
                let matched = doc
                    .get(field)
                    .map(|v| {
                        values
                            .iter()
                            .any(|candidate| candidate.compare(v) == std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(false);
                if !matched {
                    continue;
                }
            }
            if let Some(after) = request.after_version {
                let version = doc.get_int(VERSION_FIELD).unwrap_or(0) as u64;
                if version <= after {
                    continue;
                }
            }
            let projected = if request.fields.is_empty() {
                doc.clone()
            } else {
                let mut t = Tuple::new();
                for field in &request.fields {
                    if let Some(v) = doc.get(field) {
                        t = t.with_field(field.clone(), v.clone());
                    }
                }
                t
            };
            results.push(projected);
        }

        if let Some(sort) = &request.sort {
            results.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(rows) = request.rows {
            results.truncate(rows);
        }
        debug!(
            collection = %request.collection,
            rows = results.len(),
            "memory backend query"
        );
        Ok(results)
    }

    async fn mutate(
        &self,
        collection: &str,
        ops: &[MutationOp],
    ) -> Result<MutationOutcome, BackendError> {
        let mut collections = self.collections.write().expect("collections lock poisoned");
        let data = collections.entry(collection.to_string()).or_default();
        let mut outcome = MutationOutcome::default();

        for op in ops {
            match op {
                MutationOp::Add { doc } => {
                    let key = doc
                        .get("id")
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut stamped = doc.clone();
                    stamped
                        .fields
                        .insert(VERSION_FIELD.to_string(), Value::Int(version as i64));
                    data.docs.insert(key, stamped);
                    outcome.accepted += 1;
                }
                MutationOp::Delete { key, version } => {
                    let key_text = key.to_string();
                    let stored_version = data
                        .docs
                        .get(&key_text)
                        .and_then(|doc| doc.get_int(VERSION_FIELD));
                    match (version, stored_version) {
                        (Some(expected), Some(stored)) if *expected != stored => {
                            let reason = format!(
                                "version conflict: expected {}, found {}",
                                expected, stored
                            );
                            if !self.tolerant {
                                return Err(BackendError::Mutation(reason));
                            }
                            outcome.rejected.push(RejectedOp {
                                key: key_text,
                                reason,
                            });
                        }
                        _ => {
                            data.docs.remove(&key_text);
                            self.versions.fetch_add(1, Ordering::SeqCst);
                            outcome.accepted += 1;
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn commit(&self, collection: &str, _wait_searcher: bool) -> Result<(), BackendError> {
        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(collection, "memory backend commit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64, a_f: f64) -> Tuple {
        Tuple::new().with_field("id", id).with_field("a_f", a_f)
    }

    fn backend_with_docs() -> MemoryBackend {
        let backend = MemoryBackend::new(2);
        backend.index(
            "logs",
            vec![doc(0, 0.0), doc(1, 1.0), doc(2, 0.0), doc(3, 3.0), doc(4, 4.0)],
        );
        backend
    }

    #[tokio::test]
    async fn test_query_sorted() {
        let backend = backend_with_docs();
        let mut req = QueryRequest::collection("logs");
        req.sort = Some(Comparator::parse("a_f asc, id asc").unwrap());
        let tuples = backend.query(&req).await.unwrap();
        let ids: Vec<i64> = tuples.iter().map(|t| t.get_int("id").unwrap()).collect();
        assert_eq!(ids, vec![0, 2, 1, 3, 4]);
    }

    #[tokio::test]
    async fn test_shards_cover_all_docs() {
        let backend = backend_with_docs();
        let shards = backend.shards("logs").unwrap();
        assert_eq!(shards, vec!["shard1", "shard2"]);
        let mut total = 0;
        for shard in shards {
            let mut req = QueryRequest::collection("logs");
            req.shard = Some(shard);
            total += backend.query(&req).await.unwrap().len();
        }
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_field_projection() {
        let backend = backend_with_docs();
        let mut req = QueryRequest::collection("logs");
        req.fields = vec!["id".to_string()];
        let tuples = backend.query(&req).await.unwrap();
        assert!(tuples.iter().all(|t| t.get("a_f").is_none()));
    }

    #[tokio::test]
    async fn test_filter_equality() {
        let backend = backend_with_docs();
        let mut req = QueryRequest::collection("logs");
        req.filter = "a_f:0".to_string();
        let tuples = backend.query(&req).await.unwrap();
        assert_eq!(tuples.len(), 2);
    }

    #[tokio::test]
    async fn test_partition_slices_are_disjoint_and_complete() {
        let backend = backend_with_docs();
        let workers = 3;
        let mut seen = 0;
        for worker in 0..workers {
            let mut req = QueryRequest::collection("logs");
            req.partition = Some(PartitionSpec {
                keys: vec!["id".to_string()],
                worker,
                workers,
            });
            seen += backend.query(&req).await.unwrap().len();
        }
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn test_delete_version_conflict_is_tolerant() {
        let backend = backend_with_docs();
        let mut req = QueryRequest::collection("logs");
        req.filter = "id:0".to_string();
        let stored = backend.query(&req).await.unwrap();
        let good = stored[0].get_int(VERSION_FIELD).unwrap();

        let outcome = backend
            .mutate(
                "logs",
                &[
                    MutationOp::Delete {
                        key: Value::Int(0),
                        version: Some(good - 42),
                    },
                    MutationOp::Delete {
                        key: Value::Int(1),
                        version: None,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(backend.doc_count("logs"), 4);
    }

    #[tokio::test]
    async fn test_strict_mode_fails_batch_on_conflict() {
        let backend = MemoryBackend::new(1).strict();
        backend.index("logs", vec![doc(0, 0.0)]);
        let err = backend
            .mutate(
                "logs",
                &[MutationOp::Delete {
                    key: Value::Int(0),
                    version: Some(-1),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Mutation(_)));
    }

    #[tokio::test]
    async fn test_after_version_and_rows() {
        let backend = MemoryBackend::new(1);
        backend.index("topic", (0..10).map(|i| doc(i, i as f64)).collect());
        let mut req = QueryRequest::collection("topic");
        req.sort = Some(Comparator::parse(&format!("{} asc", VERSION_FIELD)).unwrap());
        req.after_version = Some(0);
        req.rows = Some(3);
        let first = backend.query(&req).await.unwrap();
        assert_eq!(first.len(), 3);
        let high = first.last().unwrap().get_int(VERSION_FIELD).unwrap() as u64;

        req.after_version = Some(high);
        let second = backend.query(&req).await.unwrap();
        assert_eq!(second.len(), 3);
        assert!(second[0].get_int(VERSION_FIELD).unwrap() as u64 > high);
    }

    #[tokio::test]
    async fn test_failing_shard() {
        let backend = backend_with_docs();
        backend.fail_shard("logs", "shard1");
        let mut req = QueryRequest::collection("logs");
        req.shard = Some("shard1".to_string());
        assert!(backend.query(&req).await.is_err());
        req.shard = Some("shard2".to_string());
        assert!(backend.query(&req).await.is_ok());
    }
}
