// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session engine lifecycle scenarios: activation, pinning, deactivation
//! and the invariant that deactivation never shrinks the metadata pool.

use std::sync::Arc;

use ctxmgr_fsresolve::FsResolver;
use ctxmgr_indexer::Indexer;
use ctxmgr_session::{AutoCollapseParams, NoopTracker, SessionEngine, ToolCallInput};
use ctxmgr_source::ToolCallStatus;
use ctxmgr_store::{DocStore, MemoryStore};
use tokio_util::sync::CancellationToken;

fn engine() -> (Arc<SessionEngine>, CancellationToken) {
    let store: Arc<dyn DocStore> = Arc::new(MemoryStore::new());
    let indexer = Arc::new(Indexer::new(store.clone()));
    let resolver = FsResolver::new("DEFAULT", vec![]);
    let engine = Arc::new(SessionEngine::new(
        store,
        indexer,
        resolver,
        Arc::new(NoopTracker),
        AutoCollapseParams::default(),
    ));
    (engine, CancellationToken::new())
}

#[tokio::test]
async fn deactivating_an_object_keeps_it_in_the_pool() {
    let (engine, cancel) = engine();
    engine.create_session("s1", "be helpful", &cancel).await.unwrap();

    let id = engine
        .record_toolcall(
            "s1",
            ToolCallInput {
                id: "call_1".into(),
                tool: "ls".into(),
                args: serde_json::json!({}),
                args_display: None,
                status: ToolCallStatus::Ok,
                content: Some("a.ts\nb.ts".into()),
                file_refs: vec![],
            },
            &cancel,
        )
        .await
        .unwrap();

    let before = engine.view("s1").await.unwrap();
    assert!(before.pool.contains(&id));
    assert!(before.active.contains(&id));

    engine.deactivate("s1", &id, &cancel).await.unwrap();

    let after = engine.view("s1").await.unwrap();
    assert!(after.pool.contains(&id), "deactivation must not remove the object from the pool");
    assert!(!after.active.contains(&id));
}

#[tokio::test]
async fn pinning_survives_auto_collapse() {
    let (engine, cancel) = engine();
    engine.create_session("s1", "be helpful", &cancel).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..8 {
        engine.begin_turn("s1", Some(format!("turn {i}")), &cancel).await.unwrap();
        let id = engine
            .record_toolcall(
                "s1",
                ToolCallInput {
                    id: format!("call_{i}"),
                    tool: "ls".into(),
                    args: serde_json::json!({}),
                    args_display: None,
                    status: ToolCallStatus::Ok,
                    content: Some(format!("output {i}")),
                    file_refs: vec![],
                },
                &cancel,
            )
            .await
            .unwrap();
        ids.push(id);
    }

    engine.pin("s1", &ids[0], &cancel).await.unwrap();
    engine.apply_auto_collapse("s1", &cancel).await.unwrap();

    let view = engine.view("s1").await.unwrap();
    assert!(view.active.contains(&ids[0]), "a pinned object must survive auto-collapse");
    assert!(view.pool.contains(&ids[0]));
}

#[tokio::test]
async fn locked_objects_cannot_be_deactivated() {
    let (engine, cancel) = engine();
    engine.create_session("s1", "be helpful", &cancel).await.unwrap();
    let view = engine.view("s1").await.unwrap();

    let err = engine
        .deactivate("s1", &view.system_prompt_ref, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ctxmgr_error::ErrorCode::LockedDeactivation);
}
