// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctxmgr_assembler::Assembler;
use ctxmgr_config::CtxManagerConfig;
use ctxmgr_fsresolve::FsResolver;
use ctxmgr_indexer::Indexer;
use ctxmgr_session::{AutoCollapseParams, SessionEngine};
use ctxmgr_source::SourceBinding;
use ctxmgr_store::{DocStore, MemoryStore};
use ctxmgr_tracker::TrackerSupervisor;
use tokio_util::sync::CancellationToken;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "ctxmgr", version, about = "Context manager CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a single file into the object store.
    Index {
        /// Agent-visible path to index.
        path: String,
    },

    /// Walk a directory and create metadata stubs for every file under it,
    /// without reading their contents.
    Discover {
        /// Agent-visible directory path to walk.
        path: String,
    },

    /// Create a new session with the given system prompt text.
    Open {
        /// Session identifier.
        session_id: String,
        /// System prompt text.
        #[arg(long, default_value = "")]
        system_prompt: String,
    },

    /// Resume a session, reconciling its sourced objects against disk.
    Resume {
        /// Session identifier.
        session_id: String,
    },

    /// Print the assembled, ordered LLM-facing render for a session.
    Render {
        /// Session identifier.
        session_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("ctxmgr=debug")
    } else {
        tracing_subscriber::EnvFilter::new("ctxmgr=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ctxmgr_config::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    let warnings =
        ctxmgr_config::validate_config(&config).context("configuration failed validation")?;
    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    let store: Arc<dyn DocStore> = Arc::new(MemoryStore::new());
    let indexer = Arc::new(Indexer::new(store.clone()));
    let default_fs_id = default_filesystem_id(&config);
    let resolver = FsResolver::new(default_fs_id, config.mounts.clone());
    let tracker = Arc::new(TrackerSupervisor::new(indexer.clone(), resolver.clone()));
    let auto_collapse = AutoCollapseParams {
        recent_toolcalls_per_turn: config.auto_collapse.recent_toolcalls_per_turn,
        recent_turns_window: config.auto_collapse.recent_turns_window,
    };
    let engine = Arc::new(SessionEngine::new(
        store.clone(),
        indexer.clone(),
        resolver.clone(),
        tracker,
        auto_collapse,
    ));
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Index { path } => {
            let resolved = resolver.resolve(&path);
            let bytes = tokio::fs::read(&resolved.canonical_path)
                .await
                .with_context(|| format!("failed to read {}", resolved.canonical_path))?;
            let source = SourceBinding::filesystem(&resolved.filesystem_id, &resolved.canonical_path);
            let result = indexer
                .index_file(&source, &bytes, &cancel)
                .await
                .context("indexing failed")?;
            println!("{} {:?}", result.id, result.outcome);
        }
        Commands::Discover { path } => {
            let resolved = resolver.resolve(&path);
            let mut created = 0;
            let mut unchanged = 0;
            for entry in walkdir::WalkDir::new(&resolved.canonical_path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let canonical = entry.path().to_string_lossy().into_owned();
                let source = SourceBinding::filesystem(&resolved.filesystem_id, &canonical);
                let result = indexer
                    .discover_file(&source, &cancel)
                    .await
                    .with_context(|| format!("failed to discover {canonical}"))?;
                match result.outcome {
                    ctxmgr_indexer::IndexOutcome::Created => created += 1,
                    _ => unchanged += 1,
                }
            }
            println!("discovered {created} new, {unchanged} already known");
        }
        Commands::Open {
            session_id,
            system_prompt,
        } => {
            engine
                .create_session(&session_id, &system_prompt, &cancel)
                .await
                .context("failed to create session")?;
            println!("session {session_id} created");
        }
        Commands::Resume { session_id } => {
            let report = engine
                .resume(&session_id, &cancel)
                .await
                .context("failed to resume session")?;
            println!(
                "reconciled {} object(s), {} orphaned",
                report.reconciled.len(),
                report.orphaned.len()
            );
        }
        Commands::Render { session_id } => {
            let assembler =
                Assembler::new(session_id.clone(), engine.clone(), store.clone(), resolver.clone());
            let rendered = assembler
                .render(&cancel)
                .await
                .context("failed to render session")?;
            for message in rendered {
                println!("--- {:?} ---\n{}\n", message.role, message.text);
            }
        }
    }

    Ok(())
}

fn default_filesystem_id(config: &CtxManagerConfig) -> String {
    match &config.default_filesystem_id_source {
        Some(ctxmgr_config::FilesystemIdSource::Literal { id }) => id.clone(),
        Some(ctxmgr_config::FilesystemIdSource::Hostname) => {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
            ctxmgr_fsresolve::derive_default_filesystem_id(&hostname)
        }
        Some(ctxmgr_config::FilesystemIdSource::MachineId { path }) => {
            let input = std::fs::read_to_string(path).unwrap_or_default();
            ctxmgr_fsresolve::derive_default_filesystem_id(&input)
        }
        None => ctxmgr_fsresolve::derive_default_filesystem_id(""),
    }
}
