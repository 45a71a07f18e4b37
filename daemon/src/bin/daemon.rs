use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::{path::PathBuf, sync::Arc};
use stele_common::{genesis::Genesis, time::get_current_time_in_seconds};
use stele_daemon::{
    bus::{ChainHandle, ChainRequest, OutboundSender, SyncEvent},
    config::{
        ChainConfig, CHAIN_MAILBOX_SIZE, DEFAULT_DATA_DIR, OUTBOUND_QUEUE_SIZE, SYNC_MAILBOX_SIZE,
    },
    core::{
        chain::ChainManager, consensus::LongestChain, executor::spawn_preload_service,
        storage::SledChainStore, vm::KvRuntime,
    },
    sync::SyncManager,
};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "steled", about = "Stele chain daemon", version)]
struct NodeArgs {
    /// Directory holding the chain store
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Genesis bundle (JSON); a dev genesis is created when omitted
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Dev mode: name addresses, no signature enforcement
    #[arg(long)]
    dev: bool,

    /// Answer orphan blocks with anchor requests instead of starting
    /// the sync pipeline
    #[arg(long)]
    no_fast_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = NodeArgs::parse();

    let genesis = match &args.genesis {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("reading genesis from {}", path.display()))?;
            serde_json::from_slice::<Genesis>(&raw).context("parsing genesis bundle")?
        }
        None => Genesis::dev("stele-dev", get_current_time_in_seconds() as i64),
    };

    let mut config = if args.dev {
        ChainConfig::dev()
    } else {
        ChainConfig::default()
    };
    config.fast_sync = !args.no_fast_sync;

    let store = SledChainStore::open(&args.data_dir)
        .with_context(|| format!("opening chain store at {}", args.data_dir.display()))?;

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    let (chain_tx, chain_rx) = mpsc::channel::<ChainRequest>(CHAIN_MAILBOX_SIZE);
    let (sync_tx, sync_rx) = mpsc::channel::<SyncEvent>(SYNC_MAILBOX_SIZE);
    let outbound = OutboundSender::new(outbound_tx);

    let mut chain = ChainManager::new(
        store,
        Arc::new(LongestChain),
        Arc::new(KvRuntime),
        outbound.clone(),
        config,
    );
    chain.set_sync_events(sync_tx.clone());
    chain.set_preload(spawn_preload_service());
    chain.init(&genesis).await?;

    let syncer = SyncManager::new(
        ChainHandle::new(chain_tx.clone()),
        outbound,
        sync_tx.clone(),
    );

    tokio::spawn(chain.run(chain_rx));
    tokio::spawn(syncer.run(sync_rx));
    // The peer transport binds here in a full deployment; without one
    // the outbound queue is drained so the core never backs up.
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            debug!("outbound (no transport): {:?}", msg);
        }
    });

    info!("steled running, data dir {}", args.data_dir.display());
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
