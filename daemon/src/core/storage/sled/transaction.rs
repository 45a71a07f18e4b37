use crate::core::{
    error::ChainError,
    storage::{BlockProvider, StoreBatch, TxIdx, TxIndexProvider},
};
use async_trait::async_trait;
use log::trace;
use stele_common::{crypto::Hash, serializer::Serializer, transaction::Transaction};

use super::SledChainStore;

#[async_trait]
impl TxIndexProvider for SledChainStore {
    async fn get_tx(&self, hash: &Hash) -> Result<(Transaction, TxIdx), ChainError> {
        let raw = self
            .txs
            .get(hash.as_bytes())?
            .ok_or_else(|| ChainError::TxNotFound(hash.clone()))?;
        let idx = TxIdx::from_bytes(&raw)?;

        let block = self.get_block(&idx.block_hash).await?;
        let tx = block
            .get_transactions()
            .get(idx.idx as usize)
            .ok_or_else(|| ChainError::TxNotFound(hash.clone()))?;
        Ok((tx.as_ref().clone(), idx))
    }

    fn add_tx_index(&self, batch: &mut StoreBatch, tx_hash: &Hash, block_hash: &Hash, idx: i32) {
        trace!("indexing tx {} -> ({}, {})", tx_hash, block_hash, idx);
        let value = TxIdx {
            block_hash: block_hash.clone(),
            idx,
        };
        batch.put_txs(tx_hash.as_bytes(), value.to_bytes());
    }

    fn remove_tx_index(&self, batch: &mut StoreBatch, tx_hash: &Hash) {
        trace!("unlinking tx {} from canonical chain", tx_hash);
        batch.del_txs(tx_hash.as_bytes());
    }
}
