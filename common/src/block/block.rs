use crate::{
    crypto::{hash, Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    ops::Deref,
    sync::Arc,
};

use super::BlockHeader;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
    #[serde(flatten)]
    header: BlockHeader,
    transactions: Vec<Arc<Transaction>>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Arc<Transaction>>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn get_header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn get_txs_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn get_transactions(&self) -> &[Arc<Transaction>] {
        &self.transactions
    }

    pub fn split(self) -> (BlockHeader, Vec<Arc<Transaction>>) {
        (self.header, self.transactions)
    }

    // Header commitment must match the carried transaction list
    pub fn verify_txs_root(&self) -> bool {
        compute_txs_root(&self.transactions) == self.header.txs_root_hash
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_u32(self.transactions.len() as u32);
        for tx in &self.transactions {
            tx.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Block, ReaderError> {
        let header = BlockHeader::read(reader)?;
        let count = reader.read_u32()? as usize;
        if count > reader.size() {
            return Err(ReaderError::InvalidSize);
        }
        let mut txs = Vec::with_capacity(count);
        for _ in 0..count {
            txs.push(Arc::new(Transaction::read(reader)?));
        }

        Ok(Block::new(header, txs))
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        self.header.hash()
    }
}

impl Deref for Block {
    type Target = BlockHeader;

    fn deref(&self) -> &Self::Target {
        self.get_header()
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "Block[no: {}, prev: {}, timestamp: {}, txs: {}]",
            self.block_no,
            self.prev_hash,
            self.timestamp,
            self.transactions.len()
        )
    }
}

// Digest over the ordered transaction hashes, committed by the header
pub fn compute_txs_root(txs: &[Arc<Transaction>]) -> Hash {
    let mut writer = Writer::new();
    writer.write_u32(txs.len() as u32);
    for tx in txs {
        writer.write_hash(tx.hash());
    }
    hash(writer.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::Address,
        transaction::{TxBody, TxType},
    };

    fn dummy_tx(nonce: u64) -> Arc<Transaction> {
        Arc::new(Transaction::new(TxBody::new(
            nonce,
            Address::from_name("alice"),
            Address::from_name("bob"),
            1,
            Vec::new(),
            TxType::Normal,
        )))
    }

    #[test]
    fn test_block_roundtrip() {
        let txs = vec![dummy_tx(1), dummy_tx(2)];
        let header = BlockHeader::new(
            3,
            Hash::zero(),
            Hash::zero(),
            compute_txs_root(&txs),
            Hash::zero(),
            1700000000,
            Address::from_name("bp"),
        );
        let block = Block::new(header, txs);
        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.get_txs_count(), 2);
        assert!(decoded.verify_txs_root());
    }

    #[test]
    fn test_hash_is_header_hash() {
        let header = BlockHeader::new(
            1,
            Hash::zero(),
            Hash::zero(),
            Hash::zero(),
            Hash::zero(),
            0,
            Address::from_name("bp"),
        );
        let block = Block::new(header.clone(), Vec::new());
        assert_eq!(block.hash(), header.hash());
    }
}
