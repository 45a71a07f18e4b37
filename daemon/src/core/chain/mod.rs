mod processor;
mod reorg;

use crate::{
    bus::{BlockInfo, ChainRequest, Outbound, OutboundSender, PeerId, SyncEvent},
    config::ChainConfig,
    core::{
        consensus::Consensus,
        error::ChainError,
        executor::PreloadHandle,
        orphan::OrphanPool,
        state::{BlockState, StateDb},
        storage::ChainStore,
        vm::ContractRuntime,
    },
};
use log::{debug, info, trace, warn};
use metrics::counter;
use std::sync::Arc;
use stele_common::{
    block::{Block, BlockNo},
    crypto::{Address, Hash, Hashable},
    genesis::Genesis,
    receipt::Receipt,
    transaction::Transaction,
};
use tokio::sync::mpsc;

// Single-threaded actor owning the chain store, the state DB and the
// orphan pool. Every mutation of `latest`, the chain index and the
// state root goes through its mailbox, which linearizes block commits
// without any locking on the canon pointer.
pub struct ChainManager<S: ChainStore> {
    pub(crate) store: S,
    pub(crate) state_db: StateDb,
    pub(crate) orphans: OrphanPool,
    pub(crate) consensus: Arc<dyn Consensus>,
    pub(crate) runtime: Arc<dyn ContractRuntime>,
    pub(crate) outbound: OutboundSender,
    pub(crate) sync_events: Option<mpsc::Sender<SyncEvent>>,
    pub(crate) preload: Option<PreloadHandle>,
    pub(crate) config: ChainConfig,
}

impl<S: ChainStore> ChainManager<S> {
    pub fn new(
        store: S,
        consensus: Arc<dyn Consensus>,
        runtime: Arc<dyn ContractRuntime>,
        outbound: OutboundSender,
        config: ChainConfig,
    ) -> Self {
        let orphans = OrphanPool::new(config.orphan_capacity, config.orphan_ttl);
        ChainManager {
            store,
            state_db: StateDb::new(),
            orphans,
            consensus,
            runtime,
            outbound,
            sync_events: None,
            preload: None,
            config,
        }
    }

    // Wire the sync engine mailbox so orphans can kick a sync session
    pub fn set_sync_events(&mut self, tx: mpsc::Sender<SyncEvent>) {
        self.sync_events = Some(tx);
    }

    pub fn set_preload(&mut self, handle: PreloadHandle) {
        self.preload = Some(handle);
    }

    // Create and commit block zero on first start. Re-running against
    // an initialized store only replays the state versions.
    pub async fn init(&mut self, genesis: &Genesis) -> Result<Block, ChainError> {
        let mut state = self.state_db.block_state();
        for (address, balance) in genesis.accounts() {
            let mut account = state.get_account(&address.id());
            account.balance = balance;
            state.put_account(address.id(), account);
        }
        state.update(0)?;
        let root = state.root()?.clone();
        self.state_db.commit(&state)?;
        self.state_db.update_root(&state)?;

        let block = genesis.to_block(root);
        if let Some(stored) = self.store.get_genesis().await? {
            if stored != *genesis {
                return Err(ChainError::InvalidBlock(
                    block.hash(),
                    "genesis does not match the stored chain".to_string(),
                ));
            }
            debug!("chain already initialized at {}", block.hash());
            self.replay().await?;
            return Ok(block);
        }

        let mut batch = self.store.batch();
        self.store.add_block(&mut batch, &block)?;
        self.store.connect_to_chain(&mut batch, &block)?;
        self.store.set_genesis(&mut batch, genesis);
        self.store.commit(batch).await?;
        self.store.set_latest(&block);
        info!("chain initialized, genesis {}", block.hash());
        Ok(block)
    }

    // Rebuild the in-memory state versions by re-executing the
    // persisted canonical chain. Receipts are rewritten identically,
    // so a crash between batches converges to the same state.
    async fn replay(&mut self) -> Result<(), ChainError> {
        let latest = self.store.get_best_block().await?.block_no;
        for no in 1..=latest {
            let block = self.store.get_block_by_no(no).await?;
            let executor = crate::core::executor::BlockExecutor {
                store: &self.store,
                runtime: self.runtime.as_ref(),
                consensus: self.consensus.as_ref(),
                outbound: &self.outbound,
                verify_sigs: self.config.verify_signatures,
                preload: self.preload.as_ref(),
            };
            executor.execute(&mut self.state_db, &block, None).await?;
        }
        if latest > 0 {
            info!("replayed {} blocks to rebuild the state", latest);
        }
        Ok(())
    }

    // Actor loop: drain the mailbox until every handle is dropped
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChainRequest>) {
        info!("chain manager started");
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
        info!("chain manager stopped");
    }

    pub async fn handle(&mut self, msg: ChainRequest) {
        match msg {
            ChainRequest::AddBlock { block, peer, resp } => {
                let _ = resp.send(self.add_block(block, None, peer).await);
            }
            ChainRequest::GetBlock { hash, resp } => {
                let _ = resp.send(self.store.get_block(&hash).await);
            }
            ChainRequest::GetBlockByNo { no, resp } => {
                let _ = resp.send(self.store.get_block_by_no(no).await);
            }
            ChainRequest::GetBestBlock { resp } => {
                let _ = resp.send(self.store.get_best_block().await);
            }
            ChainRequest::GetHashByNo { no, resp } => {
                let _ = resp.send(self.store.get_hash_by_no(no).await);
            }
            ChainRequest::GetTx { hash, resp } => {
                let _ = resp.send(self.store.get_tx(&hash).await);
            }
            ChainRequest::GetReceipt { tx_hash, resp } => {
                let _ = resp.send(self.get_receipt(&tx_hash).await);
            }
            ChainRequest::GetAnchors { resp } => {
                let _ = resp.send(self.anchors().await);
            }
        }
    }

    // Per-incoming-block workflow: validate, classify as
    // main/branch/orphan, persist and index, execute main-chain
    // blocks, trigger a reorganization when a branch outweighs canon.
    pub async fn add_block(
        &mut self,
        block: Block,
        prestate: Option<BlockState>,
        peer: Option<PeerId>,
    ) -> Result<BlockInfo, ChainError> {
        let hash = block.hash();
        let info = BlockInfo {
            hash: hash.clone(),
            no: block.block_no,
        };

        // duplicate networked blocks are a no-op
        if self.store.has_block(&hash).await? {
            trace!("block {} already known", hash);
            return Ok(info);
        }

        let best = self.store.get_best_block().await?;
        self.is_block_valid(&block, &best)?;

        if !self.store.has_block(&block.prev_hash).await? {
            // only networked blocks may be orphans: a pre-filled block
            // state implies the producer built on an unknown parent
            if prestate.is_some() {
                return Err(ChainError::InvalidBlock(
                    hash,
                    "orphan block carries a pending block state".to_string(),
                ));
            }
            self.handle_orphan(block, peer).await?;
            return Err(ChainError::BlockOrphan(hash));
        }

        let is_main = block.block_no == best.block_no + 1 && block.prev_hash == best.hash();
        debug!(
            "adding {} as {} block from {:?}",
            block,
            if is_main { "main-chain" } else { "branch" },
            peer
        );

        self.process_block(block, prestate, is_main).await?;
        counter!("stele_blocks_added").increment(1);
        Ok(info)
    }

    fn is_block_valid(&self, block: &Block, _best: &Block) -> Result<(), ChainError> {
        if block.is_genesis() {
            return Err(ChainError::InvalidBlock(
                block.hash(),
                "genesis cannot be re-added".to_string(),
            ));
        }
        self.consensus.validate_block(block)
    }

    async fn handle_orphan(&mut self, block: Block, peer: Option<PeerId>) -> Result<(), ChainError> {
        let target_no = block.block_no;
        warn!("orphan {} (parent {} unknown)", block, block.prev_hash);
        self.orphans.add(block);
        counter!("stele_orphans_cached").increment(1);

        let Some(peer) = peer else {
            return Ok(());
        };

        if self.config.fast_sync {
            if let Some(sync) = &self.sync_events {
                debug!("requesting sync from {} up to {}", peer, target_no);
                if sync
                    .send(SyncEvent::Start { peer, target_no })
                    .await
                    .is_err()
                {
                    warn!("sync engine is gone, orphan stays cached");
                }
            }
        } else {
            let anchors = self.anchors().await?;
            self.outbound.send(Outbound::GetMissingBlocks { peer, anchors });
        }
        Ok(())
    }

    // Logarithmic sample of recent canonical hashes, newest first,
    // genesis always included. Used as sync anchors.
    pub async fn anchors(&self) -> Result<Vec<BlockInfo>, ChainError> {
        let best = self.store.get_best_block().await?;
        let mut anchors = Vec::new();
        let mut no = best.block_no;
        let mut step: BlockNo = 1;
        loop {
            let hash = self.store.get_hash_by_no(no).await?;
            anchors.push(BlockInfo { hash, no });
            if no == 0 {
                break;
            }
            no = no.saturating_sub(step);
            step = step.saturating_mul(2);
        }
        Ok(anchors)
    }

    async fn get_receipt(&self, tx_hash: &Hash) -> Result<Receipt, ChainError> {
        let (_, idx) = self.store.get_tx(tx_hash).await?;
        let block = self.store.get_block(&idx.block_hash).await?;
        self.store
            .get_receipt(&idx.block_hash, block.block_no, idx.idx as usize)
            .await
    }

    // Read-only contract query against the current head state
    pub fn query_contract(&self, contract: &Address, method: &str) -> Result<Vec<u8>, ChainError> {
        let state = self.state_db.block_state();
        self.runtime
            .query(&state, &contract.id(), method)
            .map_err(ChainError::Vm)
    }

    // Canonical lookup helpers used by the harness and unit tests
    pub async fn get_tx(&self, hash: &Hash) -> Result<(Transaction, crate::core::storage::TxIdx), ChainError> {
        self.store.get_tx(hash).await
    }

    pub async fn best_block(&self) -> Result<Block, ChainError> {
        self.store.get_best_block().await
    }

    pub fn state_db(&self) -> &StateDb {
        &self.state_db
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}
