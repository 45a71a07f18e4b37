mod sled;

pub use self::sled::SledChainStore;

use crate::core::error::ChainError;
use async_trait::async_trait;
use stele_common::{
    block::{Block, BlockNo},
    crypto::Hash,
    genesis::Genesis,
    receipt::Receipt,
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};

// Key of the canonical tip inside the meta tree, value is the block
// number as 8-byte big endian
pub const LATEST_KEY: &[u8] = b"chain.latest";
// Key of the persisted genesis bundle inside the meta tree
pub const GENESIS_KEY: &[u8] = b"chain.genesis";
// Receipt keys are "r" | block_hash | block_no (8-byte little endian)
pub const RECEIPTS_PREFIX: u8 = b'r';

// Position of a canonical transaction: owning block and index into
// its ordered transaction list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIdx {
    pub block_hash: Hash,
    pub idx: i32,
}

impl Serializer for TxIdx {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.block_hash);
        writer.write_u32(self.idx as u32);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(TxIdx {
            block_hash: reader.read_hash()?,
            idx: reader.read_u32()? as i32,
        })
    }

    fn size(&self) -> usize {
        32 + 4
    }
}

// Staged writes against every tree of the store. Built by the caller,
// committed as one unit: trees are applied in a fixed order with the
// meta tree (carrying the `latest` pointer) applied last, which makes
// that put the linearization point of a chain mutation.
#[derive(Default)]
pub struct StoreBatch {
    pub(crate) blocks: ::sled::Batch,
    pub(crate) chain: ::sled::Batch,
    pub(crate) txs: ::sled::Batch,
    pub(crate) receipts: ::sled::Batch,
    pub(crate) meta: ::sled::Batch,
    puts: usize,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> usize {
        self.puts
    }

    pub(crate) fn put_blocks(&mut self, key: impl AsRef<[u8]>, value: Vec<u8>) {
        self.blocks.insert(key.as_ref(), value);
        self.puts += 1;
    }

    pub(crate) fn put_chain(&mut self, key: impl AsRef<[u8]>, value: Vec<u8>) {
        self.chain.insert(key.as_ref(), value);
        self.puts += 1;
    }

    pub(crate) fn put_txs(&mut self, key: impl AsRef<[u8]>, value: Vec<u8>) {
        self.txs.insert(key.as_ref(), value);
        self.puts += 1;
    }

    pub(crate) fn del_txs(&mut self, key: impl AsRef<[u8]>) {
        self.txs.remove(key.as_ref());
        self.puts += 1;
    }

    pub(crate) fn put_receipts(&mut self, key: impl AsRef<[u8]>, value: Vec<u8>) {
        self.receipts.insert(key.as_ref(), value);
        self.puts += 1;
    }

    pub(crate) fn put_meta(&mut self, key: impl AsRef<[u8]>, value: Vec<u8>) {
        self.meta.insert(key.as_ref(), value);
        self.puts += 1;
    }
}

#[async_trait]
pub trait BlockProvider {
    async fn has_block(&self, hash: &Hash) -> Result<bool, ChainError>;

    async fn get_block(&self, hash: &Hash) -> Result<Block, ChainError>;

    // Persist a block under its hash. Indexing into the canonical
    // chain is a separate step (connect_to_chain).
    fn add_block(&self, batch: &mut StoreBatch, block: &Block) -> Result<(), ChainError>;
}

#[async_trait]
pub trait ChainProvider {
    async fn latest_no(&self) -> Result<BlockNo, ChainError>;

    async fn get_hash_by_no(&self, no: BlockNo) -> Result<Hash, ChainError>;

    async fn get_block_by_no(&self, no: BlockNo) -> Result<Block, ChainError>;

    // Cached canonical tip, no store access on the hot path
    async fn get_best_block(&self) -> Result<Block, ChainError>;

    // Stage the canonical linkage of a block: number index, tx index
    // and the latest pointer
    fn connect_to_chain(&self, batch: &mut StoreBatch, block: &Block) -> Result<(), ChainError>;

    // Atomically (from readers' perspective) replace the canonical
    // suffix with `new_blocks`. Self-committing: writes are split in
    // slices of at most TX_BATCH_MAX puts, only the last slice carries
    // the latest pointer.
    async fn swap_chain(&self, new_blocks: &[Block]) -> Result<(), ChainError>;

    // Flip the in-memory best block cache. Only called once the batch
    // carrying the corresponding latest pointer has committed.
    fn set_latest(&self, block: &Block);
}

#[async_trait]
pub trait TxIndexProvider {
    async fn get_tx(&self, hash: &Hash) -> Result<(Transaction, TxIdx), ChainError>;

    fn add_tx_index(&self, batch: &mut StoreBatch, tx_hash: &Hash, block_hash: &Hash, idx: i32);

    fn remove_tx_index(&self, batch: &mut StoreBatch, tx_hash: &Hash);
}

#[async_trait]
pub trait ReceiptProvider {
    async fn get_receipts(
        &self,
        block_hash: &Hash,
        block_no: BlockNo,
    ) -> Result<Vec<Receipt>, ChainError>;

    async fn get_receipt(
        &self,
        block_hash: &Hash,
        block_no: BlockNo,
        idx: usize,
    ) -> Result<Receipt, ChainError>;

    fn write_receipts(
        &self,
        batch: &mut StoreBatch,
        block_hash: &Hash,
        block_no: BlockNo,
        receipts: &[Receipt],
    );
}

#[async_trait]
pub trait MetaProvider {
    async fn get_genesis(&self) -> Result<Option<Genesis>, ChainError>;

    fn set_genesis(&self, batch: &mut StoreBatch, genesis: &Genesis);
}

#[async_trait]
pub trait ChainStore:
    BlockProvider
    + ChainProvider
    + TxIndexProvider
    + ReceiptProvider
    + MetaProvider
    + Send
    + Sync
    + 'static
{
    fn batch(&self) -> StoreBatch {
        StoreBatch::new()
    }

    // Apply a staged batch. The meta tree is applied last so readers
    // never observe a latest pointer ahead of its chain index.
    async fn commit(&self, batch: StoreBatch) -> Result<(), ChainError>;
}
