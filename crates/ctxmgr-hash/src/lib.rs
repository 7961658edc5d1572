// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON and the three-layer SHA-256 hashing primitives that back
//! object identity in the context manager.
//!
//! Three pure functions matter here: [`identity_hash_sourced`] /
//! [`identity_hash_unsourced`], [`source_hash`], and [`content_hash`]. They
//! are the only global invariant linking object ids across independent
//! clients — keep the canonical-JSON rules centralised here; any divergence
//! silently forks object identity.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produce the canonical JSON representation of `value`.
///
/// Relies on `serde_json::Value`'s map being backed by a `BTreeMap` (this
/// workspace never enables the `preserve_order` feature): converting
/// through [`serde_json::Value`] and re-serializing yields keys sorted
/// lexicographically at every depth, compact separators, and no
/// whitespace — exactly the canonical form §4.1 requires.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&v)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the identity hash of a sourced object: `SHA-256(canonicalJSON({type, source}))`.
///
/// `source` is typically a [`serde_json::Value`] or any `Serialize` type
/// representing a `SourceBinding`.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `source` cannot be serialized.
pub fn identity_hash_sourced<S: Serialize>(
    type_name: &str,
    source: &S,
) -> Result<String, serde_json::Error> {
    let envelope = serde_json::json!({
        "type": type_name,
        "source": source,
    });
    let canon = canonical_json(&envelope)?;
    Ok(sha256_hex(canon.as_bytes()))
}

/// Compute the identity hash of an unsourced object: `SHA-256(type || assigned_id)`.
#[must_use]
pub fn identity_hash_unsourced(type_name: &str, assigned_id: &str) -> String {
    let mut buf = String::with_capacity(type_name.len() + assigned_id.len());
    buf.push_str(type_name);
    buf.push_str(assigned_id);
    sha256_hex(buf.as_bytes())
}

/// Compute the source hash over raw external bytes.
///
/// Returns `None` when `raw` is `None` — the source is unreadable or the
/// object is a discovery stub (§4.1, §4.4).
#[must_use]
pub fn source_hash(raw: Option<&[u8]>) -> Option<String> {
    raw.map(sha256_hex)
}

/// Compute the content hash over a mutable payload.
///
/// Clones `payload`, removes the `source_hash` and `content_hash` keys
/// (if present), canonicalises, and hashes. The removal is always by
/// cloning — the caller's value is never mutated.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `payload` is not a JSON object or
/// cannot be re-serialized.
pub fn content_hash(payload: &Value) -> Result<String, serde_json::Error> {
    let mut cloned = payload.clone();
    if let Value::Object(map) = &mut cloned {
        map.remove("source_hash");
        map.remove("content_hash");
    }
    let canon = canonical_json(&cloned)?;
    Ok(sha256_hex(canon.as_bytes()))
}
