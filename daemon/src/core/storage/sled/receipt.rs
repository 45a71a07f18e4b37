use crate::core::{
    error::ChainError,
    storage::{ReceiptProvider, StoreBatch, RECEIPTS_PREFIX},
};
use async_trait::async_trait;
use log::trace;
use stele_common::{
    block::BlockNo,
    crypto::Hash,
    receipt::Receipt,
    serializer::Serializer,
};

use super::SledChainStore;

// "r" | block_hash | block_no (LE)
fn receipts_key(block_hash: &Hash, block_no: BlockNo) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 8);
    key.push(RECEIPTS_PREFIX);
    key.extend_from_slice(block_hash.as_bytes());
    key.extend_from_slice(&block_no.to_le_bytes());
    key
}

#[async_trait]
impl ReceiptProvider for SledChainStore {
    async fn get_receipts(
        &self,
        block_hash: &Hash,
        block_no: BlockNo,
    ) -> Result<Vec<Receipt>, ChainError> {
        let raw = self
            .receipts
            .get(receipts_key(block_hash, block_no))?
            .ok_or_else(|| ChainError::BlockNotFound(block_hash.clone()))?;
        Ok(Vec::<Receipt>::from_bytes(&raw)?)
    }

    async fn get_receipt(
        &self,
        block_hash: &Hash,
        block_no: BlockNo,
        idx: usize,
    ) -> Result<Receipt, ChainError> {
        let receipts = self.get_receipts(block_hash, block_no).await?;
        // idx == len is invalid, not a sentinel for "last"
        receipts
            .into_iter()
            .nth(idx)
            .ok_or(ChainError::InvalidReceiptIndex {
                block: block_hash.clone(),
                idx,
            })
    }

    fn write_receipts(
        &self,
        batch: &mut StoreBatch,
        block_hash: &Hash,
        block_no: BlockNo,
        receipts: &[Receipt],
    ) {
        trace!(
            "staging {} receipts for block {} at {}",
            receipts.len(),
            block_hash,
            block_no
        );
        batch.put_receipts(
            receipts_key(block_hash, block_no),
            receipts.to_vec().to_bytes(),
        );
    }
}
