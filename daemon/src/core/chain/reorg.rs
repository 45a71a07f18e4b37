use crate::{
    bus::{BlockInfo, Outbound},
    core::{error::ChainError, executor::BlockExecutor, storage::ChainStore},
};
use log::{info, warn};
use metrics::counter;
use std::collections::HashSet;
use stele_common::{
    block::Block,
    crypto::{Hash, Hashable},
};

use super::ChainManager;

impl<S: ChainStore> ChainManager<S> {
    // Compare-and-swap of the canonical chain onto a heavier branch.
    //
    // Walks back from the branch tip to the fork point, rolls the
    // state back to the fork root, re-executes the branch in full
    // (every block passes post validation again) and only then swaps
    // the chain index. Any failure leaves state and index on the old
    // canonical chain.
    pub(crate) async fn reorganize(&mut self, tip: &Block) -> Result<(), ChainError> {
        let best = self.store.get_best_block().await?;
        info!("reorganizing: branch tip {}, canonical tip {}", tip, best);

        // 1. find the fork point on the canonical chain
        let mut new_chain = vec![tip.clone()];
        let mut cur = tip.clone();
        let fork = loop {
            if cur.block_no == 0 {
                return Err(ChainError::InvalidBlock(
                    tip.hash(),
                    "branch has no common ancestor with the canonical chain".to_string(),
                ));
            }
            let parent = self.store.get_block(&cur.prev_hash).await?;
            let canonical = self.store.get_hash_by_no(parent.block_no).await?;
            if canonical == parent.hash() {
                break parent;
            }
            new_chain.push(parent.clone());
            cur = parent;
        };
        new_chain.reverse();

        // 2. the canonical suffix being replaced
        let mut old_chain = Vec::with_capacity((best.block_no - fork.block_no) as usize);
        for no in fork.block_no + 1..=best.block_no {
            old_chain.push(self.store.get_block_by_no(no).await?);
        }

        info!(
            "fork at {} ({}), replacing {} blocks with {}",
            fork.block_no,
            fork.hash(),
            old_chain.len(),
            new_chain.len()
        );

        // 3. roll the state back to the fork root
        let old_root = self.state_db.root().clone();
        self.state_db.rollback_to(&fork.blocks_root_hash)?;

        // 4. re-execute the branch in order, full execution
        for block in &new_chain {
            let executor = BlockExecutor {
                store: &self.store,
                runtime: self.runtime.as_ref(),
                consensus: self.consensus.as_ref(),
                outbound: &self.outbound,
                verify_sigs: self.config.verify_signatures,
                preload: self.preload.as_ref(),
            };
            if let Err(e) = executor.execute(&mut self.state_db, block, None).await {
                warn!("reorg aborted at {}: {}", block, e);
                // the old versions are retained, fall back to the old tip
                self.state_db.rollback_to(&old_root)?;
                return Err(e);
            }
        }

        // 5. swap the canonical index, then rewrite the tx index:
        // new-chain txs point into the branch, txs only present in
        // the old chain leave the index
        self.store.swap_chain(&new_chain).await?;

        let new_txs: HashSet<Hash> = new_chain
            .iter()
            .flat_map(|b| b.get_transactions().iter().map(|tx| tx.hash().clone()))
            .collect();

        let mut batch = self.store.batch();
        for block in &old_chain {
            for tx in block.get_transactions() {
                if !new_txs.contains(tx.hash()) {
                    self.store.remove_tx_index(&mut batch, tx.hash());
                }
            }
        }
        for block in &new_chain {
            let block_hash = block.hash();
            for (idx, tx) in block.get_transactions().iter().enumerate() {
                self.store
                    .add_tx_index(&mut batch, tx.hash(), &block_hash, idx as i32);
            }
        }
        self.store.commit(batch).await?;

        let new_tip = new_chain.last().expect("reorg chain is never empty");
        self.outbound.send(Outbound::BlockNotify {
            block: BlockInfo {
                hash: new_tip.hash(),
                no: new_tip.block_no,
            },
        });
        counter!("stele_reorgs").increment(1);
        info!("reorganization done, new tip {}", new_tip);
        Ok(())
    }
}
