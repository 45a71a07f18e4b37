use crate::{
    bus::{BlockInfo, Outbound},
    core::{
        error::ChainError,
        executor::BlockExecutor,
        state::BlockState,
        storage::ChainStore,
    },
};
use log::{debug, warn};
use metrics::gauge;
use stele_common::{block::Block, crypto::Hashable};

use super::ChainManager;

impl<S: ChainStore> ChainManager<S> {
    // prepare/execute/reorganize for one incoming block.
    //
    // prepare: walk the implicit chain starting at the block,
    // persisting each link and pulling cached orphan children in.
    // Main-chain links queue up for execution; the last link decides
    // whether a reorganization is due.
    pub(crate) async fn process_block(
        &mut self,
        block: Block,
        mut prestate: Option<BlockState>,
        is_main: bool,
    ) -> Result<(), ChainError> {
        let mut main_queue: Vec<Block> = Vec::new();
        let mut cur = block;
        let mut cur_main = is_main;
        let (mut last_block, mut last_is_main);

        loop {
            let hash = cur.hash();

            // addCommon: persist the block under its hash
            let mut batch = self.store.batch();
            self.store.add_block(&mut batch, &cur)?;
            self.store.commit(batch).await?;

            if cur_main {
                main_queue.push(cur.clone());
            }
            last_block = cur.clone();
            last_is_main = cur_main;

            // extend with a cached child waiting on this block
            match self.orphans.resolve(&hash) {
                Some(child) => {
                    if child.block_no != cur.block_no + 1 {
                        warn!(
                            "dropping cached orphan {} with bad height {} above {}",
                            child.hash(),
                            child.block_no,
                            cur.block_no
                        );
                        break;
                    }
                    debug!("orphan {} rejoins the chain", child);
                    let child_main = cur_main;
                    cur = child;
                    cur_main = child_main;
                }
                None => break,
            }
        }

        // execute: apply queued main-chain blocks in order, linking
        // each into the canonical index in a single batch
        for block in &main_queue {
            let executor = BlockExecutor {
                store: &self.store,
                runtime: self.runtime.as_ref(),
                consensus: self.consensus.as_ref(),
                outbound: &self.outbound,
                verify_sigs: self.config.verify_signatures,
                preload: self.preload.as_ref(),
            };
            executor
                .execute(&mut self.state_db, block, prestate.take())
                .await?;

            let mut batch = self.store.batch();
            self.store.connect_to_chain(&mut batch, block)?;
            self.store.commit(batch).await?;
            self.store.set_latest(block);

            self.outbound.send(Outbound::BlockNotify {
                block: BlockInfo {
                    hash: block.hash(),
                    no: block.block_no,
                },
            });
            gauge!("stele_chain_height").set(block.block_no as f64);
        }

        // reorganize: a branch tip that now outweighs the canonical
        // chain takes over. Consensus-origin failures are non-fatal,
        // anything else broke an invariant the chain relies on.
        if !last_is_main {
            let best = self.store.get_best_block().await?;
            if self
                .consensus
                .need_reorg(last_block.get_header(), best.get_header())
            {
                match self.reorganize(&last_block).await {
                    Ok(()) => {}
                    Err(e) if e.is_consensus() => {
                        warn!("reorg to {} refused by consensus: {}", last_block.hash(), e);
                    }
                    Err(e) => panic!("reorganization failed, chain state is suspect: {}", e),
                }
            }
        }

        Ok(())
    }
}
