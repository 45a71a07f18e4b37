use crate::{
    bus::BlockInfo,
    config::{MAX_BLOCK_PENDING_TASKS, MAX_FETCH_TASK},
    core::error::ChainError,
};
use log::trace;
use stele_common::{block::Block, crypto::Hashable};

// Serializes out-of-order fetched blocks into a monotonically
// increasing stream for the chain manager. Blocks that do not connect
// yet wait in a small buffer and drain as soon as their parent passes.
pub struct BlockProcessor {
    prev: BlockInfo,
    pending: Vec<Block>,
}

impl BlockProcessor {
    pub fn new(ancestor: BlockInfo) -> Self {
        BlockProcessor {
            prev: ancestor,
            pending: Vec::new(),
        }
    }

    // Last block handed out in order
    pub fn connected(&self) -> &BlockInfo {
        &self.prev
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // Absorb a fetched chunk, return every block that now connects,
    // in block-number order
    pub fn feed(&mut self, blocks: Vec<Block>) -> Result<Vec<Block>, ChainError> {
        self.pending.extend(blocks);
        if self.pending.len() > MAX_BLOCK_PENDING_TASKS * MAX_FETCH_TASK {
            return Err(ChainError::SyncMessage(format!(
                "{} unconnected blocks buffered",
                self.pending.len()
            )));
        }

        let mut ready = Vec::new();
        loop {
            let Some(pos) = self
                .pending
                .iter()
                .position(|block| block.prev_hash == self.prev.hash)
            else {
                break;
            };
            let block = self.pending.swap_remove(pos);
            self.prev = BlockInfo {
                hash: block.hash(),
                no: block.block_no,
            };
            trace!("block {} connects, {} still buffered", block, self.pending.len());
            ready.push(block);
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_common::{block::BlockHeader, crypto::{Address, Hash}};

    fn chain_of(len: u64) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut prev = Hash::zero();
        for no in 1..=len {
            let header = BlockHeader::new(
                no,
                prev.clone(),
                Hash::zero(),
                Hash::zero(),
                Hash::zero(),
                no as i64,
                Address::from_name("bp"),
            );
            let block = Block::new(header, Vec::new());
            prev = block.hash();
            blocks.push(block);
        }
        blocks
    }

    fn start() -> BlockInfo {
        BlockInfo {
            hash: Hash::zero(),
            no: 0,
        }
    }

    #[test]
    fn test_in_order_passthrough() {
        let blocks = chain_of(3);
        let mut processor = BlockProcessor::new(start());
        let ready = processor.feed(blocks.clone()).unwrap();
        assert_eq!(ready.len(), 3);
        assert_eq!(processor.connected().no, 3);
    }

    #[test]
    fn test_out_of_order_buffered_and_drained() {
        let blocks = chain_of(4);
        let mut processor = BlockProcessor::new(start());

        // deliver the tail first: nothing connects
        let ready = processor.feed(vec![blocks[2].clone(), blocks[3].clone()]).unwrap();
        assert!(ready.is_empty());
        assert_eq!(processor.pending_len(), 2);

        // the head arrives and everything drains in order
        let ready = processor.feed(vec![blocks[0].clone(), blocks[1].clone()]).unwrap();
        assert_eq!(ready.len(), 4);
        let nos: Vec<u64> = ready.iter().map(|b| b.block_no).collect();
        assert_eq!(nos, vec![1, 2, 3, 4]);
        assert_eq!(processor.pending_len(), 0);
    }
}
