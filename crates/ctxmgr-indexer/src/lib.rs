// SPDX-License-Identifier: MIT OR Apache-2.0
//! The read-hash-compare-write indexing protocol for sourced objects
//! (§4.4): the single funnel through which filesystem content enters the
//! object store.

#![warn(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use ctxmgr_error::CtxError;
use ctxmgr_hash::source_hash;
use ctxmgr_source::{ObjectDoc, ObjectPayload, ObjectType, SourceBinding};
use ctxmgr_store::DocStore;
use tokio_util::sync::CancellationToken;

/// Outcome of an indexing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// No object previously existed for this source; one was created.
    Created,
    /// An object existed and a new version was written.
    Updated,
    /// The incoming content is byte-identical to the latest version; no
    /// write occurred.
    Unchanged,
}

/// Result of a call into the [`Indexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResult {
    /// The object's id (stable across every call for the same source).
    pub id: String,
    /// What happened.
    pub outcome: IndexOutcome,
}

/// The single funnel for all sourced-object mutation.
///
/// Holds an `Arc<dyn DocStore>` so it can be shared across concurrently
/// running sessions without cloning store state.
pub struct Indexer {
    store: Arc<dyn DocStore>,
}

impl Indexer {
    /// Build an indexer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self { store }
    }

    /// Full index: write `content` for `source`, applying the
    /// created/stub-upgrade/unchanged/updated decision table.
    ///
    /// # Errors
    ///
    /// Returns a [`CtxError`] if the identity hash cannot be computed, the
    /// store read fails, or the store write fails. On any error no write
    /// has occurred — this is a single atomic operation from the caller's
    /// perspective.
    pub async fn index_file(
        &self,
        source: &SourceBinding,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<IndexResult, CtxError> {
        let id = identity_hash(source)?;
        let incoming_hash = source_hash(Some(content)).expect("Some(content) always hashes");
        let existing = self.store.get(&id, cancel).await?;
        let content_text = String::from_utf8_lossy(content).into_owned();
        let file_type = file_type_for(source);

        let (outcome, new_doc) = match &existing {
            None => {
                let doc = build_version(
                    id.clone(),
                    source.clone(),
                    Some(content_text),
                    Some(incoming_hash),
                    file_type,
                );
                (IndexOutcome::Created, Some(doc))
            }
            Some(doc) if doc.content.is_none() && doc.source_hash.is_none() => {
                let new_doc = next_version(doc, Some(content_text), Some(incoming_hash), file_type);
                (IndexOutcome::Updated, Some(new_doc))
            }
            Some(doc) if doc.source_hash.as_deref() == Some(incoming_hash.as_str()) => {
                (IndexOutcome::Unchanged, None)
            }
            Some(doc) => {
                let new_doc = next_version(doc, Some(content_text), Some(incoming_hash), file_type);
                (IndexOutcome::Updated, Some(new_doc))
            }
        };

        if let Some(doc) = new_doc {
            let handle = self.store.put(doc, cancel).await?;
            self.store.await_tx(handle, cancel).await?;
        }

        tracing::debug!(target: "ctxmgr.indexer", id = %id, outcome = ?outcome, "index_file");
        Ok(IndexResult { id, outcome })
    }

    /// Metadata stub: learn that `source` exists without reading it. A
    /// no-op (`Unchanged`) if any version already exists, full or stub.
    ///
    /// # Errors
    ///
    /// Returns a [`CtxError`] if the identity hash cannot be computed or
    /// store I/O fails.
    pub async fn discover_file(
        &self,
        source: &SourceBinding,
        cancel: &CancellationToken,
    ) -> Result<IndexResult, CtxError> {
        let id = identity_hash(source)?;
        if self.store.get(&id, cancel).await?.is_some() {
            return Ok(IndexResult {
                id,
                outcome: IndexOutcome::Unchanged,
            });
        }
        let file_type = file_type_for(source);
        let doc = build_version(id.clone(), source.clone(), None, None, file_type);
        let handle = self.store.put(doc, cancel).await?;
        self.store.await_tx(handle, cancel).await?;
        tracing::debug!(target: "ctxmgr.indexer", id = %id, "discover_file created stub");
        Ok(IndexResult {
            id,
            outcome: IndexOutcome::Created,
        })
    }

    /// Tombstone: record that `source` no longer exists on disk. The
    /// object's identity and history survive; a later `index_file` on the
    /// same source revives it with a fresh content version.
    ///
    /// # Errors
    ///
    /// Returns [`ctxmgr_error::ErrorCode::UnknownObject`] if no object has
    /// ever been indexed for this source, or a store error.
    pub async fn index_file_deletion(
        &self,
        source: &SourceBinding,
        cancel: &CancellationToken,
    ) -> Result<IndexResult, CtxError> {
        let id = identity_hash(source)?;
        let existing = self
            .store
            .get(&id, cancel)
            .await?
            .ok_or_else(|| CtxError::unknown_object(id.clone()))?;
        let file_type = match &existing.payload {
            ObjectPayload::File { file_type, .. } => file_type.clone(),
            _ => file_type_for(source),
        };
        let doc = next_version(&existing, None, None, file_type);
        let handle = self.store.put(doc, cancel).await?;
        self.store.await_tx(handle, cancel).await?;
        tracing::debug!(target: "ctxmgr.indexer", id = %id, "index_file_deletion");
        Ok(IndexResult {
            id,
            outcome: IndexOutcome::Updated,
        })
    }
}

fn identity_hash(source: &SourceBinding) -> Result<String, CtxError> {
    ObjectDoc::identity_hash_for_source(ObjectType::File, source)
        .map_err(|e| CtxError::new(ctxmgr_error::ErrorCode::StoreMalformedDoc, e.to_string()))
}

fn file_type_for(source: &SourceBinding) -> String {
    source
        .path()
        .and_then(|p| Path::new(p).extension())
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_string()
}

fn build_version(
    id: String,
    source: SourceBinding,
    content: Option<String>,
    source_hash: Option<String>,
    file_type: String,
) -> ObjectDoc {
    let char_count = content.as_ref().map_or(0, |c| c.chars().count());
    let payload = ObjectPayload::File {
        file_type,
        char_count,
    };
    let mut doc = ObjectDoc {
        id: id.clone(),
        r#type: ObjectType::File,
        source: Some(source),
        identity_hash: id,
        content,
        source_hash,
        content_hash: String::new(),
        payload,
        valid_from: Utc::now(),
    };
    doc.content_hash = doc
        .recompute_content_hash()
        .expect("File payload always serializes");
    doc
}

fn next_version(
    existing: &ObjectDoc,
    content: Option<String>,
    source_hash: Option<String>,
    file_type: String,
) -> ObjectDoc {
    let char_count = content.as_ref().map_or(0, |c| c.chars().count());
    let payload = ObjectPayload::File {
        file_type,
        char_count,
    };
    let mut doc = ObjectDoc {
        id: existing.id.clone(),
        r#type: existing.r#type,
        source: existing.source.clone(),
        identity_hash: existing.identity_hash.clone(),
        content,
        source_hash,
        content_hash: String::new(),
        payload,
        valid_from: Utc::now(),
    };
    doc.content_hash = doc
        .recompute_content_hash()
        .expect("File payload always serializes");
    doc
}
