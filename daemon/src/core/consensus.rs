use crate::core::error::ChainError;
use log::trace;
use stele_common::{
    block::{Block, BlockHeader},
    config::MAX_BLOCK_TXS,
    crypto::{Hash, Hashable},
    receipt::{receipts_root, Receipt},
};

// Seam to the consensus engine. The core drives block admission,
// post-execution validation and the reorg decision through it and
// never interprets consensus data itself. Errors surfaced as
// ChainError::Consensus abort a reorg without being fatal.
pub trait Consensus: Send + Sync + 'static {
    // Structural and header-level validation of an incoming block
    fn validate_block(&self, block: &Block) -> Result<(), ChainError>;

    // Called after execution: the resulting state root and receipts
    // must match what the header committed to
    fn validate_post(
        &self,
        root: &Hash,
        receipts: &[Receipt],
        block: &Block,
    ) -> Result<(), ChainError>;

    // Weight rule: should the chain move its tip to `tip`?
    fn need_reorg(&self, tip: &BlockHeader, best: &BlockHeader) -> bool;
}

// Reference weight rule: the strictly longer chain wins
pub struct LongestChain;

impl Consensus for LongestChain {
    fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        let hash = block.hash();
        if !block.is_genesis() && block.prev_hash.is_zero() {
            return Err(ChainError::InvalidBlock(
                hash,
                "missing previous block hash".to_string(),
            ));
        }
        if block.timestamp < 0 {
            return Err(ChainError::InvalidBlock(
                hash,
                "negative timestamp".to_string(),
            ));
        }
        if block.get_txs_count() > MAX_BLOCK_TXS {
            return Err(ChainError::InvalidBlock(
                hash,
                format!("{} transactions exceed the block limit", block.get_txs_count()),
            ));
        }
        if !block.verify_txs_root() {
            return Err(ChainError::InvalidBlock(
                hash,
                "transaction root mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_post(
        &self,
        root: &Hash,
        receipts: &[Receipt],
        block: &Block,
    ) -> Result<(), ChainError> {
        if *root != block.blocks_root_hash {
            return Err(ChainError::StateRootMismatch {
                expected: block.blocks_root_hash.clone(),
                got: root.clone(),
            });
        }
        if receipts_root(receipts) != block.receipts_root_hash {
            return Err(ChainError::InvalidBlock(
                block.hash(),
                "receipts root mismatch".to_string(),
            ));
        }
        trace!("post validation passed for {}", block);
        Ok(())
    }

    fn need_reorg(&self, tip: &BlockHeader, best: &BlockHeader) -> bool {
        tip.block_no > best.block_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_common::{block::compute_txs_root, crypto::Address};

    fn header(no: u64) -> BlockHeader {
        BlockHeader::new(
            no,
            Hash::max(),
            Hash::zero(),
            compute_txs_root(&[]),
            receipts_root(&[]),
            1,
            Address::from_name("bp"),
        )
    }

    #[test]
    fn test_longest_chain_wins() {
        let consensus = LongestChain;
        assert!(consensus.need_reorg(&header(5), &header(4)));
        assert!(!consensus.need_reorg(&header(4), &header(4)));
        assert!(!consensus.need_reorg(&header(3), &header(4)));
    }

    #[test]
    fn test_validate_post_checks_roots() {
        let consensus = LongestChain;
        let block = Block::new(header(2), Vec::new());
        assert!(consensus
            .validate_post(&Hash::zero(), &[], &block)
            .is_ok());
        assert!(matches!(
            consensus.validate_post(&Hash::max(), &[], &block),
            Err(ChainError::StateRootMismatch { .. })
        ));
    }
}
