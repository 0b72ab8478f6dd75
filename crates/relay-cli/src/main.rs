//! relay - run a batch of work items through an external worker command.
//!
//! ```text
//! relay <config.json> [items.jsonl]
//! ```
//!
//! `items.jsonl` holds one `{"id", "name", "payload"}` object per line. It is
//! required for the memory store; with a SQLite store it is optional and only
//! adds items that are not in the database yet.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use relay_core::app::{StoreConfig, VerifierConfig, spawn_ctrl_c_listener};
use relay_core::impls::{
    AcceptAll, CommandVerifier, FileExistsVerifier, InMemoryWorkStore, SqliteWorkStore, TemplatePrompt,
};
use relay_core::ports::{Verifier, WorkStore};
use relay_core::{OrchestratorConfig, Scheduler, WorkItem};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn read_items(path: &Path) -> Result<Vec<WorkItem>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut items = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: WorkItem = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not a work item", path.display(), idx + 1))?;
        items.push(item);
    }
    Ok(items)
}

async fn build_store(config: &OrchestratorConfig, items: Option<Vec<WorkItem>>) -> Result<Arc<dyn WorkStore>> {
    match &config.store {
        StoreConfig::Memory => {
            let Some(items) = items else {
                bail!("the memory store needs an items file");
            };
            let mut store = InMemoryWorkStore::default();
            if let Some(max) = config.max_attempts {
                store = store.with_max_attempts(max);
            }
            let added = store.insert_items(items).await;
            info!(added, "items loaded");
            Ok(Arc::new(store))
        }
        StoreConfig::Sqlite { path } => {
            let mut store = SqliteWorkStore::open(path.clone())?;
            if let Some(max) = config.max_attempts {
                store = store.with_max_attempts(max);
            }
            if let Some(items) = items {
                let added = store.insert_items(items).await?;
                info!(added, db = %store.path().display(), "items inserted");
            }
            Ok(Arc::new(store))
        }
    }
}

fn build_verifier(config: &VerifierConfig) -> Arc<dyn Verifier> {
    match config {
        VerifierConfig::Accept => Arc::new(AcceptAll),
        VerifierConfig::FileExists { path, non_empty } => {
            let verifier = FileExistsVerifier::new(path.clone());
            if *non_empty {
                Arc::new(verifier.non_empty())
            } else {
                Arc::new(verifier)
            }
        }
        VerifierConfig::Command { argv, timeout_secs } => {
            Arc::new(CommandVerifier::new(argv.clone(), Duration::from_secs(*timeout_secs)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let Some(config_path) = args.next() else {
        bail!("usage: relay <config.json> [items.jsonl]");
    };
    let items_path = args.next();

    let config = OrchestratorConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let items = items_path.as_deref().map(read_items).transpose()?;

    let store = build_store(&config, items).await?;
    let verifier = build_verifier(&config.verifier);
    let prompt = Arc::new(TemplatePrompt::new(config.prompt_template.clone()));

    let scheduler = Scheduler::new(config, store, verifier, prompt)?;
    let listener = spawn_ctrl_c_listener(scheduler.shutdown_handle());

    let report = scheduler.run().await;
    listener.abort();
    let report = report?;

    if report.forced {
        warn!("run was cut short; killed tasks are logged as errors");
    }
    println!("{report}");
    Ok(())
}
