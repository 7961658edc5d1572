// SPDX-License-Identifier: MIT OR Apache-2.0
//! The filesystem watch loop (§4.6.1): wraps a `notify` watcher and
//! forwards classified events into a bounded `tokio` channel, the same
//! push-source-into-channel-plus-loop-task shape the reference crate's
//! event bus uses for its own subscriptions.

#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use ctxmgr_error::{CtxError, ErrorCode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The path was created or its content changed.
    Upsert,
    /// The path was removed (or renamed away).
    Unlink,
}

/// One filesystem change, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The canonical path this event concerns.
    pub path: PathBuf,
    /// What happened.
    pub kind: WatchEventKind,
}

/// A live watch: owns the underlying OS watcher (dropping this stops
/// watching) and the receiving half of its event channel.
#[derive(Debug)]
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    /// Receiver for classified events. Consumed by the caller's own loop.
    pub events: mpsc::Receiver<WatchEvent>,
}

/// Attach a watcher at `path`. Recursive watching covers every descendant;
/// non-recursive covers only direct children.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if the underlying OS watcher cannot be
/// created or cannot watch `path` (permissions, missing path, inotify
/// instance limits, etc).
pub fn watch(path: &Path, recursive: bool) -> Result<WatchHandle, CtxError> {
    let (tx, rx) = mpsc::channel(256);
    let mut watcher = RecommendedWatcher::new(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if let Some(kind) = classify(&event.kind) {
                    for path in event.paths {
                        // The callback runs on notify's own thread, not a
                        // tokio task, so `blocking_send` is correct here.
                        if tx.blocking_send(WatchEvent { path, kind }).is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch callback error"),
        }
    }, Config::default())
    .map_err(|e| CtxError::new(ErrorCode::Internal, e.to_string()).with_context("path", path.display().to_string()))?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(path, mode)
        .map_err(|e| CtxError::new(ErrorCode::Internal, e.to_string()).with_context("path", path.display().to_string()))?;

    Ok(WatchHandle {
        _watcher: watcher,
        events: rx,
    })
}

fn classify(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(WatchEventKind::Upsert),
        EventKind::Remove(_) => Some(WatchEventKind::Unlink),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn detects_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = watch(dir.path(), false).unwrap();
        let file_path = dir.path().join("a.txt");
        tokio::fs::write(&file_path, "hi").await.unwrap();

        let ev = tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(ev.kind, WatchEventKind::Upsert);
        assert_eq!(ev.path, file_path);
    }

    #[tokio::test]
    async fn detects_file_removal() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, "hi").unwrap();
        let mut handle = watch(dir.path(), false).unwrap();
        tokio::fs::remove_file(&file_path).await.unwrap();

        let mut saw_unlink = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_millis(500), handle.events.recv()).await {
                Ok(Some(ev)) if ev.kind == WatchEventKind::Unlink => {
                    saw_unlink = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_unlink);
    }

    #[test]
    fn watch_on_missing_path_errors() {
        let err = watch(Path::new("/does/not/exist/at/all"), false).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
