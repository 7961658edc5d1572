// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tracker supervisor (§4.6): the [`ctxmgr_session::Tracker`]
//! implementation that attaches a filesystem watcher per canonical path
//! and dispatches its events into the indexer. Watcher failures are
//! logged and otherwise swallowed — an object that cannot be watched
//! stays indexed, it just stops reacting to further on-disk changes.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ctxmgr_fsresolve::FsResolver;
use ctxmgr_indexer::Indexer;
use ctxmgr_session::Tracker;
use ctxmgr_source::SourceBinding;
use ctxmgr_watch::{watch, WatchEventKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Watched {
    join: JoinHandle<()>,
}

impl Drop for Watched {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Owns one watcher + dispatch loop per canonical path currently tracked
/// by any live session.
pub struct TrackerSupervisor {
    indexer: Arc<Indexer>,
    resolver: FsResolver,
    watched: Mutex<HashMap<String, Watched>>,
}

impl TrackerSupervisor {
    /// Build a supervisor over the given indexer and mount resolver.
    #[must_use]
    pub fn new(indexer: Arc<Indexer>, resolver: FsResolver) -> Self {
        Self {
            indexer,
            resolver,
            watched: Mutex::new(HashMap::new()),
        }
    }

    /// Number of canonical paths currently watched. For tests/diagnostics.
    pub async fn watched_count(&self) -> usize {
        self.watched.lock().await.len()
    }
}

#[async_trait]
impl Tracker for TrackerSupervisor {
    async fn ensure_watching(&self, agent_path: &str, source: SourceBinding) {
        let resolved = self.resolver.resolve(agent_path);
        if !resolved.is_mounted {
            return;
        }
        let canonical = resolved.canonical_path;
        let mut watched = self.watched.lock().await;
        if watched.contains_key(&canonical) {
            return;
        }

        let handle = match watch(&PathBuf::from(&canonical), false) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(path = %canonical, error = %e, "failed to attach watcher");
                return;
            }
        };

        let indexer = self.indexer.clone();
        let mut handle = handle;
        let join = tokio::spawn(async move {
            while let Some(ev) = handle.events.recv().await {
                let cancel = CancellationToken::new();
                match ev.kind {
                    WatchEventKind::Upsert => match tokio::fs::read(&ev.path).await {
                        Ok(bytes) => {
                            if let Err(e) = indexer.index_file(&source, &bytes, &cancel).await {
                                tracing::warn!(path = %ev.path.display(), error = %e, "indexing failed after watch event");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = %ev.path.display(), error = %e, "read failed after watch event");
                        }
                    },
                    WatchEventKind::Unlink => {
                        if let Err(e) = indexer.index_file_deletion(&source, &cancel).await {
                            tracing::warn!(path = %ev.path.display(), error = %e, "tombstone failed after watch event");
                        }
                    }
                }
            }
        });
        watched.insert(canonical, Watched { join });
    }

    async fn stop_watching(&self, canonical_path: &str) {
        self.watched.lock().await.remove(canonical_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxmgr_store::{DocStore, MemoryStore};
    use std::time::Duration;

    #[tokio::test]
    async fn ensure_watching_ignores_unmounted_paths() {
        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(Indexer::new(store));
        let resolver = FsResolver::new("DEFAULT", vec![]);
        let sup = TrackerSupervisor::new(indexer, resolver);
        sup.ensure_watching("/unmounted/path", SourceBinding::filesystem("FS1", "/unmounted/path"))
            .await;
        assert_eq!(sup.watched_count().await, 0);
    }

    #[tokio::test]
    async fn ensure_watching_attaches_and_reindexes_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.ts");
        tokio::fs::write(&file_path, "v1").await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(Indexer::new(store.clone()));
        let resolver = FsResolver::new(
            "DEFAULT",
            vec![ctxmgr_fsresolve::MountMapping {
                agent_prefix: "/ws".into(),
                canonical_prefix: dir.path().to_str().unwrap().into(),
                filesystem_id: "FS1".into(),
                writable: true,
            }],
        );
        let sup = TrackerSupervisor::new(indexer.clone(), resolver);
        let agent_path = format!("/ws/{}", "a.ts");
        let source = SourceBinding::filesystem("FS1", file_path.to_str().unwrap());
        let cancel = CancellationToken::new();
        indexer.index_file(&source, b"v1", &cancel).await.unwrap();

        sup.ensure_watching(&agent_path, source.clone()).await;
        assert_eq!(sup.watched_count().await, 1);

        tokio::fs::write(&file_path, "v2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let id = ctxmgr_source::ObjectDoc::identity_hash_for_source(
            ctxmgr_source::ObjectType::File,
            &source,
        )
        .unwrap();
        let doc = store.get(&id, &cancel).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("v2"));
    }
}
