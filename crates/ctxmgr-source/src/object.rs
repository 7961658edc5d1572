// SPDX-License-Identifier: MIT OR Apache-2.0
//! The object envelope/payload split (§3, §3.1).
//!
//! Every tracked thing in the context manager — a file, a tool call, the
//! running chat, the system prompt, a session's own bookkeeping document —
//! is represented as an [`ObjectDoc`]: an immutable envelope plus a
//! type-tagged, mutable [`ObjectPayload`]. Grounded on the reference
//! crate's `IrContentBlock` tagged-union pattern.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ctxmgr_hash::{content_hash, identity_hash_sourced, identity_hash_unsourced};

use crate::source::SourceBinding;

/// The `type` discriminant shared by an [`ObjectDoc`]'s envelope and its
/// [`ObjectPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A file tracked through a filesystem source binding.
    File,
    /// A single tool invocation and its result.
    #[serde(rename = "toolcall")]
    ToolCall,
    /// The accumulating chat history for a session. Locked, unsourced.
    Chat,
    /// The system prompt text for a session. Locked, unsourced.
    SystemPrompt,
    /// A session's own bookkeeping document (the three content sets).
    Session,
}

impl ObjectType {
    /// The wire-level discriminant string for this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::ToolCall => "toolcall",
            Self::Chat => "chat",
            Self::SystemPrompt => "system_prompt",
            Self::Session => "session",
        }
    }

    /// Locked types forbid deactivation (invariant 7) and never appear in
    /// any session's content sets (invariant 5: index, pool, active, or
    /// pinned) — `chat`, `system_prompt`, and a session's own bookkeeping
    /// document are all infrastructure, not content the agent browses.
    #[must_use]
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Chat | Self::SystemPrompt | Self::Session)
    }

    /// Whether this type is ever sourced (backed by a [`SourceBinding`]).
    #[must_use]
    pub fn is_sourced(self) -> bool {
        matches!(self, Self::File)
    }

    /// Parse the wire discriminant string back into an [`ObjectType`].
    #[must_use]
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "toolcall" => Some(Self::ToolCall),
            "chat" => Some(Self::Chat),
            "system_prompt" => Some(Self::SystemPrompt),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// Status of a completed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// The tool call completed successfully.
    Ok,
    /// The tool call failed.
    Fail,
}

/// One turn in a chat history: a user message, the assistant's response,
/// and the tool calls the assistant issued along the way.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChatTurn {
    /// The user message that opened this turn.
    pub user_text: Option<String>,
    /// The assistant's response in this turn.
    pub assistant_text: Option<String>,
    /// Model identifier that produced `assistant_text`, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Ids of tool-call objects issued during this turn, in order. A
    /// subset of the chat payload's flat `toolcall_refs`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolcall_ids: Vec<String>,
}

/// The type-specific, mutable portion of an [`ObjectDoc`] (§3.1).
///
/// Tagged on `type` so that serializing an `ObjectPayload` alone reproduces
/// the same discriminant as the enclosing `ObjectDoc.type` — callers must
/// keep the two in sync; [`ObjectDoc::new_sourced`] and the unsourced
/// constructors enforce this by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectPayload {
    /// `file` payload.
    #[serde(rename = "file")]
    File {
        /// Extension-derived file type (`"ts"`, `"md"`, `""` for none).
        file_type: String,
        /// `length(content)`; `0` for stubs.
        char_count: usize,
    },
    /// `toolcall` payload.
    #[serde(rename = "toolcall")]
    ToolCall {
        /// Tool name as invoked.
        tool: String,
        /// Arguments passed to the tool, as a JSON value.
        args: serde_json::Value,
        /// Optional human-facing rendering of `args`.
        #[serde(skip_serializing_if = "Option::is_none")]
        args_display: Option<String>,
        /// Outcome of the call.
        status: ToolCallStatus,
        /// Id of the chat object this call belongs to.
        chat_ref: String,
        /// File object ids this call touched, if any.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        file_refs: Vec<String>,
    },
    /// `chat` payload.
    #[serde(rename = "chat")]
    Chat {
        /// Accumulated turns, oldest first.
        turns: Vec<ChatTurn>,
        /// Id of the owning session object.
        session_ref: String,
        /// `turns.len()`, denormalised for cheap rendering.
        turn_count: usize,
        /// Tool-call object ids referenced from `turns`, in order.
        toolcall_refs: Vec<String>,
    },
    /// `system_prompt` payload. Carries no fields beyond the common
    /// `content`.
    #[serde(rename = "system_prompt")]
    SystemPrompt {},
    /// `session` payload — the three content sets plus cross-references.
    #[serde(rename = "session")]
    Session {
        /// This session's own id (equal to the enclosing envelope's `id`
        /// with the `session:` prefix stripped, but stored explicitly).
        session_id: String,
        /// Id of this session's chat object.
        chat_ref: String,
        /// Id of this session's system-prompt object.
        system_prompt_ref: String,
        /// Every object ever encountered by this session. Only grows.
        session_index: Vec<String>,
        /// The working set surfaced to the operator/agent.
        metadata_pool: Vec<String>,
        /// The subset of `metadata_pool` whose full content is rendered.
        active_set: Vec<String>,
        /// The subset of `metadata_pool` exempt from auto-collapse.
        pinned_set: Vec<String>,
    },
}

impl ObjectPayload {
    /// The [`ObjectType`] this payload variant corresponds to.
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::File { .. } => ObjectType::File,
            Self::ToolCall { .. } => ObjectType::ToolCall,
            Self::Chat { .. } => ObjectType::Chat,
            Self::SystemPrompt {} => ObjectType::SystemPrompt,
            Self::Session { .. } => ObjectType::Session,
        }
    }
}

/// A full versioned object: immutable envelope plus mutable, type-tagged
/// payload (§3).
///
/// The envelope fields (`id`, `r#type`, `source`, `identity_hash`) must be
/// byte-identical across every version written through the same `id`
/// (invariant 1); only `content`, `source_hash`, `content_hash`, and
/// `payload` change between versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectDoc {
    /// Hex identity hash for sourced objects; the assigned id otherwise.
    pub id: String,
    /// Envelope type discriminant.
    pub r#type: ObjectType,
    /// Source binding, for sourced types; `None` otherwise.
    pub source: Option<SourceBinding>,
    /// `identity_hash` per invariant 2.
    pub identity_hash: String,
    /// Literal text content, or `None` if unread/deleted.
    pub content: Option<String>,
    /// SHA-256 of raw source bytes; `None` for unsourced types or stubs.
    pub source_hash: Option<String>,
    /// SHA-256 of the mutable payload minus `source_hash`/`content_hash`.
    pub content_hash: String,
    /// Type-specific fields.
    pub payload: ObjectPayload,
    /// Transaction time this version was written, stamped by the store
    /// client (not the store itself — see `ctxmgr-store`).
    pub valid_from: DateTime<Utc>,
}

impl ObjectDoc {
    /// Derive the identity hash for a sourced object from its type and
    /// source binding (invariant 2, first clause).
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `source` cannot be serialized.
    pub fn identity_hash_for_source(
        object_type: ObjectType,
        source: &SourceBinding,
    ) -> Result<String, serde_json::Error> {
        identity_hash_sourced(object_type.as_str(), source)
    }

    /// Derive the identity hash for an unsourced object from its type and
    /// assigned id (invariant 2, second clause).
    #[must_use]
    pub fn identity_hash_for_assigned_id(object_type: ObjectType, assigned_id: &str) -> String {
        identity_hash_unsourced(object_type.as_str(), assigned_id)
    }

    /// Recompute this object's `content_hash` from its current `payload`
    /// and `content`, per invariant 8.
    ///
    /// This does not mutate `self`; callers assign the result into
    /// `content_hash` when constructing a new version.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload cannot be
    /// serialized as a JSON object.
    pub fn recompute_content_hash(&self) -> Result<String, serde_json::Error> {
        let mut v = serde_json::to_value(&self.payload)?;
        if let serde_json::Value::Object(map) = &mut v {
            map.remove("type");
            if let Some(content) = &self.content {
                map.insert("content".into(), serde_json::Value::String(content.clone()));
            } else {
                map.insert("content".into(), serde_json::Value::Null);
            }
            if let Some(sh) = &self.source_hash {
                map.insert("source_hash".into(), serde_json::Value::String(sh.clone()));
            }
        }
        content_hash(&v)
    }

    /// The envelope's own `(id, type, source, identity_hash)` tuple, used
    /// to assert byte-identity across versions (invariant 1).
    #[must_use]
    pub fn envelope_key(&self) -> (String, ObjectType, Option<SourceBinding>, String) {
        (
            self.id.clone(),
            self.r#type,
            self.source.clone(),
            self.identity_hash.clone(),
        )
    }

    /// Whether this object is currently backed by readable content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Whether this object's type is exempt from deactivation (invariant 7).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.r#type.is_locked()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::source::SourceBinding;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn identity_hash_for_source_is_deterministic(
            fs_id in "[a-zA-Z0-9]{1,16}",
            path in "/[a-z0-9/._-]{1,32}",
        ) {
            let source = SourceBinding::filesystem(&fs_id, &path);
            let a = ObjectDoc::identity_hash_for_source(ObjectType::File, &source).unwrap();
            let b = ObjectDoc::identity_hash_for_source(ObjectType::File, &source).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn identity_hash_differs_when_path_differs(
            fs_id in "[a-zA-Z0-9]{1,16}",
            path_a in "/[a-z0-9/._-]{1,32}",
            path_b in "/[a-z0-9/._-]{1,32}",
        ) {
            prop_assume!(path_a != path_b);
            let a = ObjectDoc::identity_hash_for_source(
                ObjectType::File,
                &SourceBinding::filesystem(&fs_id, &path_a),
            )
            .unwrap();
            let b = ObjectDoc::identity_hash_for_source(
                ObjectType::File,
                &SourceBinding::filesystem(&fs_id, &path_b),
            )
            .unwrap();
            prop_assert_ne!(a, b);
        }

        #[test]
        fn content_hash_changes_iff_content_changes(
            content_a in "[a-z ]{0,64}",
            content_b in "[a-z ]{0,64}",
        ) {
            let source = SourceBinding::filesystem("FS1", "/home/u/a.ts");
            let identity = ObjectDoc::identity_hash_for_source(ObjectType::File, &source).unwrap();
            let mut doc = ObjectDoc {
                id: identity.clone(),
                r#type: ObjectType::File,
                source: Some(source),
                identity_hash: identity,
                content: Some(content_a.clone()),
                source_hash: None,
                content_hash: String::new(),
                payload: ObjectPayload::File { file_type: "ts".into(), char_count: content_a.len() },
                valid_from: Utc::now(),
            };
            let hash_a = doc.recompute_content_hash().unwrap();
            doc.content = Some(content_b.clone());
            let hash_b = doc.recompute_content_hash().unwrap();
            if content_a == content_b {
                prop_assert_eq!(hash_a, hash_b);
            } else {
                prop_assert_ne!(hash_a, hash_b);
            }
        }
    }
}
