// SPDX-License-Identifier: MIT OR Apache-2.0
//! The source-binding tagged union.
//!
//! A [`SourceBinding`] is the immutable `{type, ...}` that defines what a
//! sourced object tracks. It is a discriminated union keyed on `type`;
//! variants must be exhaustively switched (no open-world extension at
//! runtime — adding a new variant, e.g. `s3` or `git`, requires adding
//! identity-hash and source-hash rules for it here).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An immutable binding from an [`crate::Object`] to the external thing it
/// tracks.
///
/// Every variant fully determines: (a) how the identity hash is computed
/// (via [`crate::object::identity_hash_for`]), (b) how the source hash is
/// computed (always `SHA-256` over raw bytes, uniformly across variants),
/// and (c) which tracker subsystem applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceBinding {
    /// A file reachable on some filesystem, identified by a filesystem id
    /// (§4.2) and a canonical absolute path.
    Filesystem {
        /// Filesystem identifier this path is resolved against.
        #[serde(rename = "filesystemId")]
        filesystem_id: String,
        /// Canonical (post-translation) absolute path. No trailing slashes
        /// (except root), no `.`/`..` segments, no empty segments.
        path: String,
    },
}

impl SourceBinding {
    /// The `type` discriminant string, as it appears on the wire.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Filesystem { .. } => "filesystem",
        }
    }

    /// Construct a filesystem source binding.
    #[must_use]
    pub fn filesystem(filesystem_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Filesystem {
            filesystem_id: filesystem_id.into(),
            path: path.into(),
        }
    }

    /// The canonical path, if this is a filesystem binding.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Filesystem { path, .. } => Some(path),
        }
    }

    /// The filesystem id, if this is a filesystem binding.
    #[must_use]
    pub fn filesystem_id(&self) -> Option<&str> {
        match self {
            Self::Filesystem { filesystem_id, .. } => Some(filesystem_id),
        }
    }
}
