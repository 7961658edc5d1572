// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flat wire-document codec (§6).
//!
//! [`ObjectDoc`]/[`ObjectPayload`] are an ergonomic, nested Rust domain
//! type — convenient for construction and exhaustive pattern matching.
//! The store's actual wire format is flat: every field lives directly on
//! the document, keyed by `xt/id`, with no `payload` sub-object. Rather
//! than coax `serde(flatten)` through an internally-tagged enum (the
//! payload's own `type` tag would collide with the envelope's `type`
//! field), this module hand-writes the two directions explicitly — the
//! same shape as the reference crate's `StreamingCodec` encode/decode
//! pair.

use ctxmgr_error::{CtxError, ErrorCode};
use ctxmgr_source::{ObjectDoc, ObjectPayload, ObjectType, SourceBinding};
use serde_json::{Map, Value};

const ENVELOPE_KEYS: &[&str] = &[
    "xt/id",
    "type",
    "source",
    "identity_hash",
    "content",
    "file_hash",
    "content_hash",
    "valid_from",
    "metadata_hash",
];

/// Flatten an [`ObjectDoc`] into its wire representation.
///
/// # Errors
///
/// Returns a [`CtxError`] (`STORE_MALFORMED_DOC`) if the payload cannot be
/// serialized to a JSON object.
pub fn to_wire_value(doc: &ObjectDoc) -> Result<Value, CtxError> {
    let mut map = Map::new();
    map.insert("xt/id".into(), Value::String(doc.id.clone()));
    map.insert("type".into(), Value::String(doc.r#type.as_str().into()));
    map.insert(
        "source".into(),
        match &doc.source {
            Some(s) => serde_json::to_value(s).map_err(malformed)?,
            None => Value::Null,
        },
    );
    map.insert(
        "identity_hash".into(),
        Value::String(doc.identity_hash.clone()),
    );
    map.insert(
        "content".into(),
        doc.content.clone().map_or(Value::Null, Value::String),
    );
    // Wire column name `file_hash` carries the envelope's `source_hash`
    // for every sourced type, never repurposed for other meanings.
    map.insert(
        "file_hash".into(),
        doc.source_hash.clone().map_or(Value::Null, Value::String),
    );
    map.insert(
        "content_hash".into(),
        Value::String(doc.content_hash.clone()),
    );
    map.insert(
        "valid_from".into(),
        Value::String(doc.valid_from.to_rfc3339()),
    );

    let payload_value = serde_json::to_value(&doc.payload).map_err(malformed)?;
    if let Value::Object(payload_map) = payload_value {
        for (k, v) in payload_map {
            if k == "type" {
                continue;
            }
            map.insert(k, v);
        }
    }

    if let ObjectPayload::Session {
        session_index,
        metadata_pool,
        active_set,
        pinned_set,
        ..
    } = &doc.payload
    {
        let sets = serde_json::json!({
            "session_index": session_index,
            "metadata_pool": metadata_pool,
            "active_set": active_set,
            "pinned_set": pinned_set,
        });
        let canon = ctxmgr_hash::canonical_json(&sets).map_err(malformed)?;
        map.insert(
            "metadata_hash".into(),
            Value::String(ctxmgr_hash::sha256_hex(canon.as_bytes())),
        );
    }

    Ok(Value::Object(map))
}

/// Reconstruct an [`ObjectDoc`] from its wire representation.
///
/// # Errors
///
/// Returns a [`CtxError`] (`STORE_MALFORMED_DOC`) if `value` is not an
/// object, is missing a required envelope field, or its type-specific
/// fields do not match the declared `type`.
pub fn from_wire_value(value: &Value) -> Result<ObjectDoc, CtxError> {
    let map = value
        .as_object()
        .ok_or_else(|| malformed_msg("wire document is not a JSON object"))?;

    let id = req_str(map, "xt/id")?.to_string();
    let type_str = req_str(map, "type")?;
    let object_type = ObjectType::from_wire_str(type_str)
        .ok_or_else(|| malformed_msg(format!("unknown object type: {type_str}")))?;

    let source = match map.get("source") {
        Some(Value::Null) | None => None,
        Some(v) => Some(serde_json::from_value::<SourceBinding>(v.clone()).map_err(malformed)?),
    };
    let identity_hash = req_str(map, "identity_hash")?.to_string();
    let content = opt_str(map, "content");
    let source_hash = opt_str(map, "file_hash");
    let content_hash = req_str(map, "content_hash")?.to_string();
    let valid_from = req_str(map, "valid_from")?
        .parse()
        .map_err(|e| CtxError::new(ErrorCode::StoreMalformedDoc, "invalid valid_from").with_source(FmtErr(e)))?;

    let mut payload_map = map.clone();
    for key in ENVELOPE_KEYS {
        payload_map.remove(*key);
    }
    payload_map.insert("type".into(), Value::String(type_str.to_string()));
    let payload = serde_json::from_value::<ObjectPayload>(Value::Object(payload_map))
        .map_err(malformed)?;

    Ok(ObjectDoc {
        id,
        r#type: object_type,
        source,
        identity_hash,
        content,
        source_hash,
        content_hash,
        payload,
        valid_from,
    })
}

struct FmtErr<E: std::fmt::Display>(E);

impl<E: std::fmt::Display> std::fmt::Debug for FmtErr<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl<E: std::fmt::Display> std::fmt::Display for FmtErr<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl<E: std::fmt::Display> std::error::Error for FmtErr<E> {}

fn req_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, CtxError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed_msg(format!("missing or non-string field: {key}")))
}

fn opt_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn malformed(e: serde_json::Error) -> CtxError {
    CtxError::new(ErrorCode::StoreMalformedDoc, e.to_string())
}

fn malformed_msg(msg: impl Into<String>) -> CtxError {
    CtxError::new(ErrorCode::StoreMalformedDoc, msg)
}
