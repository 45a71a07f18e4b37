use crate::core::{
    error::ChainError,
    storage::{
        BlockProvider, ChainProvider, ChainStore, StoreBatch, TxIndexProvider, LATEST_KEY,
    },
};
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::sync::Arc;
use stele_common::{
    block::{Block, BlockNo},
    config::TX_BATCH_MAX,
    crypto::{Hash, Hashable},
    serializer::Serializer,
};

use super::SledChainStore;

#[async_trait]
impl ChainProvider for SledChainStore {
    async fn latest_no(&self) -> Result<BlockNo, ChainError> {
        Ok(self.get_best_block().await?.block_no)
    }

    async fn get_hash_by_no(&self, no: BlockNo) -> Result<Hash, ChainError> {
        let raw = self
            .chain
            .get(no.to_be_bytes())?
            .ok_or(ChainError::BlockNoNotFound(no))?;
        Ok(Hash::from_bytes(&raw)?)
    }

    async fn get_block_by_no(&self, no: BlockNo) -> Result<Block, ChainError> {
        let hash = self.get_hash_by_no(no).await?;
        self.get_block(&hash).await
    }

    async fn get_best_block(&self) -> Result<Block, ChainError> {
        let best = self.best.read().unwrap();
        match best.as_ref() {
            Some(block) => Ok(block.as_ref().clone()),
            None => Err(ChainError::NoChainStore),
        }
    }

    fn connect_to_chain(&self, batch: &mut StoreBatch, block: &Block) -> Result<(), ChainError> {
        let hash = block.hash();
        trace!("connecting {} to canonical chain", block);
        batch.put_chain(block.block_no.to_be_bytes(), hash.as_bytes().to_vec());
        for (idx, tx) in block.get_transactions().iter().enumerate() {
            self.add_tx_index(batch, tx.hash(), &hash, idx as i32);
        }
        batch.put_meta(LATEST_KEY, block.block_no.to_be_bytes().to_vec());
        Ok(())
    }

    async fn swap_chain(&self, new_blocks: &[Block]) -> Result<(), ChainError> {
        let best = self.get_best_block().await?;
        let tip = match new_blocks.last() {
            Some(tip) if tip.block_no > best.block_no => tip,
            _ => {
                warn!(
                    "refusing swap chain: {} new blocks against tip {}",
                    new_blocks.len(),
                    best.block_no
                );
                return Err(ChainError::InvalidSwapChain);
            }
        };

        // Store-level batches are bounded, the rewrite is sliced and
        // intermediate slices commit on their own. Only the final
        // slice carries the latest pointer: a crash in between leaves
        // `latest` on the old tip and the new chain is re-discovered
        // through sync.
        let mut batch = self.batch();
        for block in new_blocks {
            batch.put_chain(
                block.block_no.to_be_bytes(),
                block.hash().as_bytes().to_vec(),
            );
            if batch.puts() >= TX_BATCH_MAX {
                debug!("swap chain slice of {} puts committing", batch.puts());
                let full = std::mem::replace(&mut batch, self.batch());
                self.commit(full).await?;
            }
        }
        batch.put_meta(LATEST_KEY, tip.block_no.to_be_bytes().to_vec());
        self.commit(batch).await?;
        self.set_latest(tip);
        debug!("chain swapped, new tip {}", tip);
        Ok(())
    }

    fn set_latest(&self, block: &Block) {
        trace!("best block cache moves to {}", block);
        *self.best.write().unwrap() = Some(Arc::new(block.clone()));
    }
}
