// SPDX-License-Identifier: MIT OR Apache-2.0
//! A full stack integration test: configuration loaded from disk drives
//! the mount resolver, a real file is indexed through it, and the
//! assembler's render surfaces that file's content in an ACTIVE_CONTENT
//! block under its agent-visible path.

use std::sync::Arc;

use ctxmgr_assembler::Assembler;
use ctxmgr_indexer::Indexer;
use ctxmgr_session::{AutoCollapseParams, NoopTracker, SessionEngine};
use ctxmgr_store::{DocStore, MemoryStore};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn configured_mount_drives_assembler_render_of_a_real_file() {
    let workspace = tempfile::tempdir().unwrap();
    let file_path = workspace.path().join("README.md");
    std::fs::write(&file_path, "hello from disk").unwrap();

    let config_toml = format!(
        r#"
        store_endpoint = "memory://local"

        [default_filesystem_id_source]
        source = "literal"
        id = "fs-project"

        [[mounts]]
        agent_prefix = "/workspace"
        canonical_prefix = "{}"
        filesystem_id = "fs-project"
        writable = true
        "#,
        workspace.path().to_str().unwrap().replace('\\', "\\\\")
    );
    let config_dir = tempfile::tempdir().unwrap();
    let config_path = config_dir.path().join("ctxmgr.toml");
    std::fs::write(&config_path, config_toml).unwrap();

    let config = ctxmgr_config::load_config(Some(&config_path)).unwrap();
    ctxmgr_config::validate_config(&config).unwrap();

    let resolver = ctxmgr_fsresolve::FsResolver::new("fs-project", config.mounts.clone());
    let store: Arc<dyn DocStore> = Arc::new(MemoryStore::new());
    let indexer = Arc::new(Indexer::new(store.clone()));
    let engine = Arc::new(SessionEngine::new(
        store.clone(),
        indexer.clone(),
        resolver.clone(),
        Arc::new(NoopTracker),
        AutoCollapseParams::default(),
    ));
    let cancel = CancellationToken::new();
    engine.create_session("s1", "be terse", &cancel).await.unwrap();

    let resolved = resolver.resolve("/workspace/README.md");
    assert!(resolved.is_mounted);
    let source = ctxmgr_source::SourceBinding::filesystem(&resolved.filesystem_id, &resolved.canonical_path);
    let bytes = tokio::fs::read(&resolved.canonical_path).await.unwrap();
    let indexed = indexer.index_file(&source, &bytes, &cancel).await.unwrap();

    engine.encounter("s1", &indexed.id, &cancel).await.unwrap();
    engine.promote_to_pool("s1", &indexed.id, &cancel).await.unwrap();
    engine.activate("s1", &indexed.id, &cancel).await.unwrap();

    let assembler = Assembler::new("s1", engine.clone(), store.clone(), resolver.clone());
    let rendered = assembler.render(&cancel).await.unwrap();
    let active_content = rendered
        .iter()
        .find(|m| m.text.contains("ACTIVE_CONTENT"))
        .expect("an active content block must be present");
    assert!(active_content.text.contains("hello from disk"));
}
