// SPDX-License-Identifier: MIT OR Apache-2.0
//! The session engine (§4.5): three-tier content sets, activation,
//! pinning, auto-collapse, persistence and resume.
//!
//! [`SessionEngine`] holds the shared store and indexer plus an in-memory
//! [`SessionCache`] per live session id, mirroring the reference crate's
//! `BackendRegistry`/`HashMap`-of-typed-state pattern. Every mutating
//! method locks exactly one session's cache for its duration — per the
//! concurrency model, a session is never mutated by two calls at once —
//! and persists a fresh [`ObjectPayload::Session`] version before
//! returning `Ok`, so the cache and the store can never diverge on a
//! torn write.

#![warn(missing_docs)]

mod cache;
mod tracker;

pub use cache::{AutoCollapseParams, SessionCache, TurnRef};
pub use tracker::{NoopTracker, Tracker};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ctxmgr_error::{CtxError, ErrorCode};
use ctxmgr_fsresolve::FsResolver;
use ctxmgr_indexer::Indexer;
use ctxmgr_source::{ChatTurn, ObjectDoc, ObjectPayload, ObjectType, SourceBinding};
use ctxmgr_store::{DocStore, Query};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A read-only view of one session's content sets, for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// This session's chat object id.
    pub chat_ref: String,
    /// This session's system-prompt object id.
    pub system_prompt_ref: String,
    /// Every object this session has ever encountered.
    pub index: Vec<String>,
    /// The working set surfaced to the operator/agent.
    pub pool: Vec<String>,
    /// The subset of `pool` whose content is rendered in full.
    pub active: Vec<String>,
    /// The subset of `pool` exempt from auto-collapse.
    pub pinned: Vec<String>,
}

/// Inputs for [`SessionEngine::record_toolcall`].
#[derive(Debug, Clone)]
pub struct ToolCallInput {
    /// Provider-supplied tool-call identifier, used as the object's id.
    pub id: String,
    /// Tool name as invoked.
    pub tool: String,
    /// Arguments passed to the tool.
    pub args: serde_json::Value,
    /// Optional human-facing rendering of `args`.
    pub args_display: Option<String>,
    /// Outcome of the call.
    pub status: ctxmgr_source::ToolCallStatus,
    /// The tool's result text, or `None` if unavailable.
    pub content: Option<String>,
    /// File object ids this call touched, if any.
    pub file_refs: Vec<String>,
}

/// Outcome of [`SessionEngine::resume`].
#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    /// Ids reconciled against the filesystem, with their indexing outcome.
    pub reconciled: Vec<ctxmgr_indexer::IndexResult>,
    /// Ids whose filesystem source could not be read during reconciliation.
    pub orphaned: Vec<String>,
}

/// Holds the store, indexer, mount resolver, tracker handle and the
/// registry of live session caches (§4.5.1).
pub struct SessionEngine {
    store: Arc<dyn DocStore>,
    indexer: Arc<Indexer>,
    resolver: FsResolver,
    tracker: Arc<dyn Tracker>,
    auto_collapse: AutoCollapseParams,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionCache>>>>,
}

impl SessionEngine {
    /// Build an engine over the given store, indexer, mount resolver and
    /// tracker handle, with the given auto-collapse window.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocStore>,
        indexer: Arc<Indexer>,
        resolver: FsResolver,
        tracker: Arc<dyn Tracker>,
        auto_collapse: AutoCollapseParams,
    ) -> Self {
        Self {
            store,
            indexer,
            resolver,
            tracker,
            auto_collapse,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn cache_handle(&self, session_id: &str) -> Result<Arc<Mutex<SessionCache>>, CtxError> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                CtxError::new(
                    ErrorCode::SessionNotFound,
                    format!("no such session: {session_id}"),
                )
            })
    }

    /// Create a new session: a fresh chat object, a fresh system-prompt
    /// object, and a fresh session bookkeeping document, all with empty
    /// content sets.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::SessionIdInUse`] if a session document already
    /// exists under this id, or a store error.
    pub async fn create_session(
        &self,
        session_id: &str,
        system_prompt_text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let session_assigned = format!("session:{session_id}");
        if self.store.get(&session_assigned, cancel).await?.is_some() {
            return Err(CtxError::new(
                ErrorCode::SessionIdInUse,
                format!("session id already in use: {session_id}"),
            )
            .with_context("session_id", session_id));
        }

        let chat_ref = format!("chat:{session_id}");
        let system_prompt_ref = format!("system_prompt:{session_id}");

        let chat_doc = unsourced_doc(
            chat_ref.clone(),
            ObjectType::Chat,
            None,
            ObjectPayload::Chat {
                turns: Vec::new(),
                session_ref: session_assigned.clone(),
                turn_count: 0,
                toolcall_refs: Vec::new(),
            },
        )?;
        let prompt_doc = unsourced_doc(
            system_prompt_ref.clone(),
            ObjectType::SystemPrompt,
            Some(system_prompt_text.to_string()),
            ObjectPayload::SystemPrompt {},
        )?;

        self.write(chat_doc, cancel).await?;
        self.write(prompt_doc, cancel).await?;

        let cache = SessionCache::new(chat_ref, system_prompt_ref);
        self.persist_session(session_id, &cache, cancel).await?;

        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), Arc::new(Mutex::new(cache)));
        Ok(())
    }

    /// Record that this session has encountered `obj_id`. Idempotent: a
    /// repeat encounter is a no-op, not a new version.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InfrastructureObject`] if `obj_id` names a locked type
    /// (`chat`, `system_prompt`, `session`) — invariant 5 forbids those
    /// from appearing in any session's content sets, including the index.
    pub async fn encounter(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if let Some(doc) = self.store.get(obj_id, cancel).await? {
            if doc.is_locked() {
                return Err(CtxError::new(
                    ErrorCode::InfrastructureObject,
                    format!("cannot encounter infrastructure object: {obj_id}"),
                )
                .with_context("id", obj_id));
            }
        }
        if cache.index.insert(obj_id.to_string()) {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// Promote an encountered object into the metadata pool.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::UnknownObject`] if `obj_id` has not been encountered;
    /// [`ErrorCode::InfrastructureObject`] if it names a locked type.
    pub async fn promote_to_pool(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if !cache.index.contains(obj_id) {
            return Err(CtxError::unknown_object(obj_id));
        }
        let doc = self
            .store
            .get(obj_id, cancel)
            .await?
            .ok_or_else(|| CtxError::unknown_object(obj_id))?;
        if doc.is_locked() {
            return Err(CtxError::new(
                ErrorCode::InfrastructureObject,
                format!("cannot promote infrastructure object: {obj_id}"),
            )
            .with_context("id", obj_id));
        }
        if doc.r#type == ObjectType::ToolCall {
            cache.toolcall_ids.insert(obj_id.to_string());
        }
        if cache.pool.insert(obj_id.to_string()) {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// Activate a pooled object so its full content renders.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::UnknownObject`] if `obj_id` is not in the metadata
    /// pool; [`ErrorCode::ContentUnavailable`] if its content is null.
    pub async fn activate(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if !cache.pool.contains(obj_id) {
            return Err(CtxError::unknown_object(obj_id));
        }
        let doc = self
            .store
            .get(obj_id, cancel)
            .await?
            .ok_or_else(|| CtxError::unknown_object(obj_id))?;
        if !doc.has_content() {
            return Err(CtxError::content_unavailable(obj_id));
        }
        if cache.active.insert(obj_id.to_string()) {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// Deactivate an active object. The object remains in the pool.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::LockedDeactivation`] if `obj_id` names a locked type;
    /// [`ErrorCode::UnknownObject`] if it is not currently active.
    pub async fn deactivate(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if let Some(doc) = self.store.get(obj_id, cancel).await? {
            if doc.is_locked() {
                return Err(CtxError::locked_deactivation(obj_id));
            }
        }
        if !cache.active.remove(obj_id) {
            return Err(CtxError::unknown_object(obj_id));
        }
        self.persist_session(session_id, &cache, cancel).await
    }

    /// Pin a pooled object, exempting it from auto-collapse.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::UnknownObject`] if `obj_id` is not in the metadata pool.
    pub async fn pin(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if !cache.pool.contains(obj_id) {
            return Err(CtxError::unknown_object(obj_id));
        }
        if cache.pinned.insert(obj_id.to_string()) {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// Unpin a pooled object, making it eligible for auto-collapse again.
    pub async fn unpin(
        &self,
        session_id: &str,
        obj_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        if cache.pinned.remove(obj_id) {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// Begin a new chat turn with the given user message, if any.
    pub async fn begin_turn(
        &self,
        session_id: &str,
        user_text: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        let chat_ref = cache.chat_ref.clone();
        let mut chat = self.fetch_chat(&chat_ref, cancel).await?;
        if let ObjectPayload::Chat { turns, turn_count, .. } = &mut chat.payload {
            turns.push(ChatTurn {
                user_text,
                assistant_text: None,
                model: None,
                toolcall_ids: Vec::new(),
            });
            *turn_count = turns.len();
        }
        self.write(chat, cancel).await?;
        cache.turns.push_back(TurnRef::default());
        Ok(())
    }

    /// Attach the assistant's response to the current (last) turn.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::ProtocolMalformedEvent`] if no turn has been opened.
    pub async fn set_assistant_response(
        &self,
        session_id: &str,
        assistant_text: &str,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let cache = handle.lock().await;
        let chat_ref = cache.chat_ref.clone();
        drop(cache);
        let mut chat = self.fetch_chat(&chat_ref, cancel).await?;
        if let ObjectPayload::Chat { turns, .. } = &mut chat.payload {
            let turn = turns.last_mut().ok_or_else(|| {
                CtxError::new(
                    ErrorCode::ProtocolMalformedEvent,
                    "assistant response with no open turn",
                )
            })?;
            turn.assistant_text = Some(assistant_text.to_string());
            turn.model = model.map(str::to_string);
        }
        self.write(chat, cancel).await
    }

    /// Absorb a completed tool call: create its object, encounter and
    /// promote it into the pool, activate it, append its id to the
    /// current turn, then run auto-collapse (§4.5).
    ///
    /// # Errors
    ///
    /// Returns a store or session-precondition error. `content_unavailable`
    /// is tolerated: the call is still recorded, just not activated.
    pub async fn record_toolcall(
        &self,
        session_id: &str,
        input: ToolCallInput,
        cancel: &CancellationToken,
    ) -> Result<String, CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let chat_ref = handle.lock().await.chat_ref.clone();

        let identity = ObjectDoc::identity_hash_for_assigned_id(ObjectType::ToolCall, &input.id);
        let mut doc = ObjectDoc {
            id: input.id.clone(),
            r#type: ObjectType::ToolCall,
            source: None,
            identity_hash: identity,
            content: input.content,
            source_hash: None,
            content_hash: String::new(),
            payload: ObjectPayload::ToolCall {
                tool: input.tool,
                args: input.args,
                args_display: input.args_display,
                status: input.status,
                chat_ref,
                file_refs: input.file_refs,
            },
            valid_from: Utc::now(),
        };
        doc.content_hash = doc
            .recompute_content_hash()
            .map_err(|e| CtxError::new(ErrorCode::StoreMalformedDoc, e.to_string()))?;
        let has_content = doc.has_content();
        self.write(doc, cancel).await?;

        self.encounter(session_id, &input.id, cancel).await?;
        self.promote_to_pool(session_id, &input.id, cancel).await?;
        if has_content {
            self.activate(session_id, &input.id, cancel).await?;
        }

        let mut cache = handle.lock().await;
        if let Some(turn) = cache.turns.back_mut() {
            turn.toolcall_ids.push(input.id.clone());
        } else {
            cache.turns.push_back(TurnRef {
                toolcall_ids: vec![input.id.clone()],
            });
        }
        let chat_ref = cache.chat_ref.clone();
        drop(cache);

        let mut chat = self.fetch_chat(&chat_ref, cancel).await?;
        if let ObjectPayload::Chat { turns, toolcall_refs, .. } = &mut chat.payload {
            if let Some(turn) = turns.last_mut() {
                turn.toolcall_ids.push(input.id.clone());
            }
            toolcall_refs.push(input.id.clone());
        }
        self.write(chat, cancel).await?;

        self.apply_auto_collapse(session_id, cancel).await?;
        Ok(input.id)
    }

    /// Recompute and apply the auto-collapse window, persisting the
    /// session document only if the active set actually changed.
    pub async fn apply_auto_collapse(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let mut cache = handle.lock().await;
        let before = cache.active.clone();
        cache.apply_auto_collapse(self.auto_collapse);
        if cache.active != before {
            self.persist_session(session_id, &cache, cancel).await?;
        }
        Ok(())
    }

    /// A read-only snapshot of a live session's content sets.
    pub async fn view(&self, session_id: &str) -> Result<SessionView, CtxError> {
        let handle = self.cache_handle(session_id).await?;
        let cache = handle.lock().await;
        Ok(SessionView {
            chat_ref: cache.chat_ref.clone(),
            system_prompt_ref: cache.system_prompt_ref.clone(),
            index: cache.index.iter().cloned().collect(),
            pool: cache.pool.iter().cloned().collect(),
            active: cache.active.iter().cloned().collect(),
            pinned: cache.pinned.iter().cloned().collect(),
        })
    }

    /// Resume a session from its latest persisted document: batch-fetch
    /// every encountered object, re-run the indexer against whichever
    /// filesystem sources are still readable, tombstone the rest, and
    /// rebuild the in-memory cache (§4.5.1, testable scenario 5).
    ///
    /// # Errors
    ///
    /// [`ErrorCode::SessionNotFound`] if no session document exists for
    /// this id, or a store error.
    pub async fn resume(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResumeReport, CtxError> {
        let assigned = format!("session:{session_id}");
        let doc = self
            .store
            .get(&assigned, cancel)
            .await?
            .ok_or_else(|| {
                CtxError::new(
                    ErrorCode::SessionNotFound,
                    format!("no such session: {session_id}"),
                )
            })?;
        let (chat_ref, system_prompt_ref, session_index, metadata_pool, active_set, pinned_set) =
            match doc.payload {
                ObjectPayload::Session {
                    chat_ref,
                    system_prompt_ref,
                    session_index,
                    metadata_pool,
                    active_set,
                    pinned_set,
                    ..
                } => (
                    chat_ref,
                    system_prompt_ref,
                    session_index,
                    metadata_pool,
                    active_set,
                    pinned_set,
                ),
                _ => {
                    return Err(CtxError::new(
                        ErrorCode::StoreMalformedDoc,
                        "session id resolved to a non-session document",
                    ))
                }
            };

        let objs = self
            .store
            .query(&Query::by_ids(session_index.clone()), cancel)
            .await?;
        let by_id: HashMap<String, ObjectDoc> =
            objs.into_iter().map(|d| (d.id.clone(), d)).collect();

        let mut report = ResumeReport::default();
        let mut toolcall_ids = std::collections::BTreeSet::new();
        for id in &session_index {
            let Some(obj) = by_id.get(id) else { continue };
            if obj.r#type == ObjectType::ToolCall {
                toolcall_ids.insert(id.clone());
            }
            let Some(source) = &obj.source else { continue };
            let SourceBinding::Filesystem { path, .. } = source;
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let r = self.indexer.index_file(source, &bytes, cancel).await?;
                    let agent_path = self.resolver.reverse_resolve(path);
                    if self.resolver.is_watchable(&agent_path) {
                        self.tracker.ensure_watching(&agent_path, source.clone()).await;
                    }
                    report.reconciled.push(r);
                }
                Err(e) => {
                    tracing::warn!(id = %id, path = %path, error = %e, "source unreadable on resume");
                    let r = self.indexer.index_file_deletion(source, cancel).await?;
                    report.reconciled.push(r);
                    report.orphaned.push(id.clone());
                }
            }
        }

        let chat = self.fetch_chat(&chat_ref, cancel).await?;
        let turns = match chat.payload {
            ObjectPayload::Chat { turns, .. } => turns
                .into_iter()
                .map(|t| TurnRef {
                    toolcall_ids: t.toolcall_ids,
                })
                .collect(),
            _ => Default::default(),
        };

        let cache = SessionCache {
            index: session_index.into_iter().collect(),
            pool: metadata_pool.into_iter().collect(),
            active: active_set.into_iter().collect(),
            pinned: pinned_set.into_iter().collect(),
            toolcall_ids,
            turns,
            chat_ref,
            system_prompt_ref,
        };
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), Arc::new(Mutex::new(cache)));

        Ok(report)
    }

    async fn fetch_chat(
        &self,
        chat_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<ObjectDoc, CtxError> {
        self.store
            .get(chat_ref, cancel)
            .await?
            .ok_or_else(|| CtxError::unknown_object(chat_ref))
    }

    async fn write(&self, doc: ObjectDoc, cancel: &CancellationToken) -> Result<(), CtxError> {
        let handle = self.store.put(doc, cancel).await?;
        self.store.await_tx(handle, cancel).await
    }

    async fn persist_session(
        &self,
        session_id: &str,
        cache: &SessionCache,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        let doc = session_doc(session_id, cache)?;
        self.write(doc, cancel).await
    }
}

fn unsourced_doc(
    assigned_id: String,
    object_type: ObjectType,
    content: Option<String>,
    payload: ObjectPayload,
) -> Result<ObjectDoc, CtxError> {
    let identity = ObjectDoc::identity_hash_for_assigned_id(object_type, &assigned_id);
    let mut doc = ObjectDoc {
        id: assigned_id,
        r#type: object_type,
        source: None,
        identity_hash: identity,
        content,
        source_hash: None,
        content_hash: String::new(),
        payload,
        valid_from: Utc::now(),
    };
    doc.content_hash = doc
        .recompute_content_hash()
        .map_err(|e| CtxError::new(ErrorCode::StoreMalformedDoc, e.to_string()))?;
    Ok(doc)
}

fn session_doc(session_id: &str, cache: &SessionCache) -> Result<ObjectDoc, CtxError> {
    let assigned_id = format!("session:{session_id}");
    let payload = ObjectPayload::Session {
        session_id: session_id.to_string(),
        chat_ref: cache.chat_ref.clone(),
        system_prompt_ref: cache.system_prompt_ref.clone(),
        session_index: cache.index.iter().cloned().collect(),
        metadata_pool: cache.pool.iter().cloned().collect(),
        active_set: cache.active.iter().cloned().collect(),
        pinned_set: cache.pinned.iter().cloned().collect(),
    };
    unsourced_doc(assigned_id, ObjectType::Session, None, payload)
}
