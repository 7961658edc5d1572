// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bitemporal document store abstraction (§4.3) and its in-process
//! reference implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxmgr_error::{CtxError, ErrorCode};
use ctxmgr_source::ObjectDoc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque handle returned by [`DocStore::put`], resolved by
/// [`DocStore::await_tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub Uuid);

/// One entry in an object's version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Transaction time this version became valid.
    pub valid_from: DateTime<Utc>,
    /// Content hash of this version, standing in for a full document
    /// fetch when only change detection is needed.
    pub content_hash: String,
}

/// A declarative batch read, used to fetch many objects by id during
/// session resume without one round trip per id.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Ids to fetch. Ids absent from the store are silently omitted from
    /// the result, not reported as errors.
    pub ids: Vec<String>,
}

impl Query {
    /// Build a query for the given ids.
    #[must_use]
    pub fn by_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Abstraction over any bitemporal document store (§4.3).
///
/// Every method accepts a [`CancellationToken`] — the cooperative
/// abort-signal contract that every suspending core operation honours.
/// The core never assumes schema enforcement from the store: failures are
/// surfaced as-is, and concurrent conflicting writes on the same id are
/// resolved by recording separate versions, never by compare-and-swap.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Submit a document write keyed by its id. `doc.valid_from` is the
    /// transaction time, stamped by the caller — the store never samples
    /// a clock itself.
    async fn put(&self, doc: ObjectDoc, cancel: &CancellationToken) -> Result<TxHandle, CtxError>;

    /// Block until the write behind `handle` is durably indexed.
    async fn await_tx(&self, handle: TxHandle, cancel: &CancellationToken) -> Result<(), CtxError>;

    /// Latest version as-of now, or `None` if the id is unknown.
    async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Option<ObjectDoc>, CtxError>;

    /// The version valid at the given transaction time, or `None`.
    async fn get_as_of(
        &self,
        id: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<ObjectDoc>, CtxError>;

    /// Ordered (oldest-first) version history for an id.
    async fn history(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, CtxError>;

    /// Batch-fetch by id list.
    async fn query(&self, query: &Query, cancel: &CancellationToken) -> Result<Vec<ObjectDoc>, CtxError>;
}

#[derive(Debug, Clone)]
struct VersionedDoc {
    valid_from: DateTime<Utc>,
    doc: ObjectDoc,
}

/// An in-process bitemporal store over a `BTreeMap<String, Vec<VersionedDoc>>`
/// guarded by a single `tokio::sync::RwLock`.
///
/// Every `put` appends a new version to that id's vector and keeps it
/// sorted by `valid_from`; `get`/`get_as_of`/`history` never mutate and
/// never drop old versions. This is the store the CLI and the test suite
/// run against — a networked bitemporal backend substitutes for it behind
/// the same [`DocStore`] trait in a real deployment.
#[derive(Debug, Default)]
pub struct MemoryStore {
    versions: RwLock<BTreeMap<String, Vec<VersionedDoc>>>,
}

impl MemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

async fn respect_cancellation<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CtxError>
where
    F: std::future::Future<Output = Result<T, CtxError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CtxError::new(ErrorCode::StoreUnavailable, "operation cancelled")),
        res = fut => res,
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn put(&self, doc: ObjectDoc, cancel: &CancellationToken) -> Result<TxHandle, CtxError> {
        respect_cancellation(cancel, async {
            let id = doc.id.clone();
            let mut guard = self.versions.write().await;
            let entry = guard.entry(doc.id.clone()).or_default();
            entry.push(VersionedDoc {
                valid_from: doc.valid_from,
                doc,
            });
            entry.sort_by_key(|v| v.valid_from);
            tracing::debug!(target: "ctxmgr.store", id = %id, version_count = entry.len(), "put");
            Ok(TxHandle(Uuid::new_v4()))
        })
        .await
    }

    async fn await_tx(&self, _handle: TxHandle, cancel: &CancellationToken) -> Result<(), CtxError> {
        // Writes are synchronously durable the instant `put` returns; this
        // exists only to satisfy the `put`-then-`awaitTx` read-after-write
        // discipline callers rely on against a networked backend.
        respect_cancellation(cancel, async { Ok(()) }).await
    }

    async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Option<ObjectDoc>, CtxError> {
        respect_cancellation(cancel, async {
            let guard = self.versions.read().await;
            Ok(guard
                .get(id)
                .and_then(|versions| versions.last())
                .map(|v| v.doc.clone()))
        })
        .await
    }

    async fn get_as_of(
        &self,
        id: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<ObjectDoc>, CtxError> {
        respect_cancellation(cancel, async {
            let guard = self.versions.read().await;
            Ok(guard.get(id).and_then(|versions| {
                versions
                    .iter()
                    .filter(|v| v.valid_from <= as_of)
                    .next_back()
                    .map(|v| v.doc.clone())
            }))
        })
        .await
    }

    async fn history(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, CtxError> {
        respect_cancellation(cancel, async {
            let guard = self.versions.read().await;
            Ok(guard.get(id).map_or_else(Vec::new, |versions| {
                versions
                    .iter()
                    .map(|v| HistoryEntry {
                        valid_from: v.valid_from,
                        content_hash: v.doc.content_hash.clone(),
                    })
                    .collect()
            }))
        })
        .await
    }

    async fn query(&self, query: &Query, cancel: &CancellationToken) -> Result<Vec<ObjectDoc>, CtxError> {
        respect_cancellation(cancel, async {
            let guard = self.versions.read().await;
            Ok(query
                .ids
                .iter()
                .filter_map(|id| guard.get(id).and_then(|versions| versions.last()))
                .map(|v| v.doc.clone())
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxmgr_source::{ObjectPayload, ObjectType, SourceBinding};

    fn file_doc(content: &str, valid_from: DateTime<Utc>) -> ObjectDoc {
        let source = SourceBinding::filesystem("FS1", "/a/b.ts");
        let identity = ObjectDoc::identity_hash_for_source(ObjectType::File, &source).unwrap();
        let payload = ObjectPayload::File {
            file_type: "ts".into(),
            char_count: content.len(),
        };
        let mut doc = ObjectDoc {
            id: identity.clone(),
            r#type: ObjectType::File,
            source: Some(source),
            identity_hash: identity,
            content: Some(content.into()),
            source_hash: Some(ctxmgr_hash::sha256_hex(content.as_bytes())),
            content_hash: String::new(),
            payload,
            valid_from,
        };
        doc.content_hash = doc.recompute_content_hash().unwrap();
        doc
    }

    #[tokio::test]
    async fn get_on_empty_store_is_none() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        assert!(store.get("nope", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let doc = file_doc("hello", Utc::now());
        let id = doc.id.clone();
        let handle = store.put(doc.clone(), &cancel).await.unwrap();
        store.await_tx(handle, &cancel).await.unwrap();
        let fetched = store.get(&id, &cancel).await.unwrap().unwrap();
        assert_eq!(fetched, doc);
    }

    #[tokio::test]
    async fn second_put_produces_a_new_version_get_returns_latest() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let v1 = file_doc("v1", DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let v2 = file_doc("v2", DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc));
        let id = v1.id.clone();
        store.put(v1, &cancel).await.unwrap();
        store.put(v2.clone(), &cancel).await.unwrap();
        let latest = store.get(&id, &cancel).await.unwrap().unwrap();
        assert_eq!(latest, v2);
    }

    #[tokio::test]
    async fn get_as_of_returns_version_valid_at_that_time() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let v1 = file_doc("v1", t1);
        let v2 = file_doc("v2", t2);
        let id = v1.id.clone();
        store.put(v1.clone(), &cancel).await.unwrap();
        store.put(v2, &cancel).await.unwrap();
        let mid = t1 + chrono::Duration::hours(1);
        let at_mid = store.get_as_of(&id, mid, &cancel).await.unwrap().unwrap();
        assert_eq!(at_mid, v1);
    }

    #[tokio::test]
    async fn get_as_of_before_first_version_is_none() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let doc = file_doc("v1", t1);
        let id = doc.id.clone();
        store.put(doc, &cancel).await.unwrap();
        let before = t1 - chrono::Duration::hours(1);
        assert!(store.get_as_of(&id, before, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_ordered_oldest_first() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let v1 = file_doc("v1", t1);
        let v2 = file_doc("v2", t2);
        let id = v1.id.clone();
        store.put(v1, &cancel).await.unwrap();
        store.put(v2, &cancel).await.unwrap();
        let hist = store.history(&id, &cancel).await.unwrap();
        assert_eq!(hist.len(), 2);
        assert!(hist[0].valid_from < hist[1].valid_from);
    }

    #[tokio::test]
    async fn concurrent_identical_writes_both_recorded_as_harmless_duplicates() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let t = Utc::now();
        let a = file_doc("same", t);
        let b = file_doc("same", t);
        let id = a.id.clone();
        store.put(a, &cancel).await.unwrap();
        store.put(b, &cancel).await.unwrap();
        let hist = store.history(&id, &cancel).await.unwrap();
        assert_eq!(hist.len(), 2);
    }

    #[tokio::test]
    async fn query_by_ids_skips_unknown() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let doc = file_doc("v1", Utc::now());
        let id = doc.id.clone();
        store.put(doc.clone(), &cancel).await.unwrap();
        let result = store
            .query(&Query::by_ids([id.clone(), "missing".to_string()]), &cancel)
            .await
            .unwrap();
        assert_eq!(result, vec![doc]);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_put() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let doc = file_doc("v1", Utc::now());
        let id = doc.id.clone();
        let err = store.put(doc, &cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreUnavailable);
        assert!(store.get(&id, &CancellationToken::new()).await.unwrap().is_none());
    }
}
