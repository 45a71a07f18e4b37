use crate::core::{
    error::ChainError,
    storage::{BlockProvider, StoreBatch},
};
use async_trait::async_trait;
use log::trace;
use stele_common::{
    block::Block,
    crypto::{Hash, Hashable},
    serializer::Serializer,
};

use super::SledChainStore;

#[async_trait]
impl BlockProvider for SledChainStore {
    async fn has_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        if self.block_cache.lock().unwrap().contains(hash) {
            return Ok(true);
        }
        Ok(self.blocks.contains_key(hash.as_bytes())?)
    }

    async fn get_block(&self, hash: &Hash) -> Result<Block, ChainError> {
        trace!("get block {}", hash);
        if let Some(block) = self.block_cache.lock().unwrap().get(hash) {
            return Ok(block.clone());
        }
        let raw = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or_else(|| ChainError::BlockNotFound(hash.clone()))?;
        let block = Block::from_bytes(&raw)?;
        self.block_cache
            .lock()
            .unwrap()
            .put(hash.clone(), block.clone());
        Ok(block)
    }

    fn add_block(&self, batch: &mut StoreBatch, block: &Block) -> Result<(), ChainError> {
        let hash = block.hash();
        trace!("staging block {} under {}", block, hash);
        batch.put_blocks(hash.as_bytes(), block.to_bytes());
        Ok(())
    }
}
