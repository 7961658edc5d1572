// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object model for the context manager: the source-binding tagged union
//! and the envelope/payload split that every stored object follows.
//!
//! This crate only defines shapes and pure helpers over them. Reading and
//! writing these objects through the read-hash-compare-write protocol
//! lives in `ctxmgr-indexer`; persisting them as flat wire documents lives
//! in `ctxmgr-store`.

#![warn(missing_docs)]

mod object;
mod source;

pub use object::{ChatTurn, ObjectDoc, ObjectPayload, ObjectType, ToolCallStatus};
pub use source::SourceBinding;
