// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bitemporal document store abstraction and its in-process reference
//! implementation, plus the flat wire-document codec objects are
//! persisted through.

#![warn(missing_docs)]

mod store;
mod wire;

pub use store::{DocStore, HistoryEntry, MemoryStore, Query, TxHandle};
pub use wire::{from_wire_value, to_wire_value};
