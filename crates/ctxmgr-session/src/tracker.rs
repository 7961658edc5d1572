// SPDX-License-Identifier: MIT OR Apache-2.0
//! The interface [`crate::SessionEngine`] uses to ask the tracker
//! supervisor to attach or drop a watcher (§4.6), kept in this crate so
//! the session engine does not depend on the watcher implementation.

use async_trait::async_trait;
use ctxmgr_source::SourceBinding;

/// Attach/detach side of the tracker supervisor, as seen by the session
/// engine. The concrete implementation lives in the watcher-owning crate
/// and is injected at construction, mirroring the reference crate's
/// `Backend` trait / `BackendRegistry` split.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Ensure a watcher is attached at the canonical path `agent_path`
    /// resolves to, if it resolves onto a mounted (watchable) filesystem.
    /// A no-op if a watcher is already attached there.
    async fn ensure_watching(&self, agent_path: &str, source: SourceBinding);

    /// Detach the watcher at `canonical_path`, if any.
    async fn stop_watching(&self, canonical_path: &str);
}

/// A [`Tracker`] that does nothing, for callers that index content
/// without filesystem watching (tests, one-shot CLI invocations).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

#[async_trait]
impl Tracker for NoopTracker {
    async fn ensure_watching(&self, _agent_path: &str, _source: SourceBinding) {}
    async fn stop_watching(&self, _canonical_path: &str) {}
}
