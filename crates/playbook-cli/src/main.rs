//! Playbook sync runner
//!
//! Reads a canvas document saved by the editor and brings the store in line
//! with it.
//!
//! Usage:
//!   playbook-sync --canvas canvas.json
//!   playbook-sync --canvas canvas.json --in-memory --max-concurrency 1

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use playbook_core::{CanvasDocument, MemoryStoreClient, PlaybookId, StoreClient, SyncConfig, SyncOrchestrator};
use playbook_monitoring::{init_logging, LogExt, MonitoringConfig};
use playbook_store_http::{ODataStoreClient, ODataStoreConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Canvas document to synchronize
    #[arg(short, long)]
    canvas: PathBuf,

    /// Playbook to write to, instead of the document's own id
    #[arg(long)]
    playbook_id: Option<String>,

    /// Store calls allowed in flight
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Leave records of removed nodes in the store
    #[arg(long)]
    keep_orphans: bool,

    /// Run against an empty in-memory store instead of the configured service
    #[arg(long)]
    in_memory: bool,
}

fn read_canvas(path: &Path) -> Result<CanvasDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read canvas file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid canvas document {}", path.display()))
}

fn sync_config(cli: &Cli) -> SyncConfig {
    let mut config = SyncConfig::from_env();
    if let Some(limit) = cli.max_concurrency {
        config.max_concurrent_upserts = limit;
    }
    if cli.keep_orphans {
        config.delete_orphans = false;
    }
    config
}

fn build_store(cli: &Cli) -> Result<Arc<dyn StoreClient>> {
    if cli.in_memory {
        return Ok(Arc::new(MemoryStoreClient::new()));
    }
    let config = ODataStoreConfig::from_env().context("Failed to load store configuration")?;
    let client = ODataStoreClient::new(config).context("Failed to create store client")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&MonitoringConfig::from_env()).context("Failed to initialize logging")?;

    let document = read_canvas(&cli.canvas)?;
    let playbook_id = PlaybookId(cli.playbook_id.clone().unwrap_or(document.playbook_id.clone()));
    info!(
        playbook_id = %playbook_id,
        nodes = document.nodes.len(),
        edges = document.edges.len(),
        "Loaded canvas document"
    );

    let store = build_store(&cli)?;
    let orchestrator = SyncOrchestrator::new(store, sync_config(&cli));
    let report = orchestrator
        .sync(&playbook_id, &document.nodes, &document.edges)
        .await
        .log_err("Sync aborted")
        .context("Sync failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize sync report")?
    );
    info!(summary = %report.summary(), "Done");

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
