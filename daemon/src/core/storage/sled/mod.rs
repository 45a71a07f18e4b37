mod block;
mod chain;
mod meta;
mod receipt;
mod transaction;

use crate::{
    config::DEFAULT_BLOCK_CACHE_SIZE,
    core::{
        error::ChainError,
        storage::{ChainStore, StoreBatch, LATEST_KEY},
    },
};
use async_trait::async_trait;
use log::{debug, trace};
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};
use stele_common::{block::Block, crypto::Hash, serializer::Serializer};

// Persistent block index over five sled trees:
//   blocks:   block_hash -> serialized block (all known blocks)
//   chain:    block_no (8-byte BE) -> block_hash (canonical only)
//   txs:      tx_hash -> TxIdx (canonical only)
//   receipts: "r" | block_hash | block_no (8-byte LE) -> receipt list
//   meta:     latest pointer, genesis bundle
pub struct SledChainStore {
    #[allow(dead_code)]
    db: sled::Db,
    pub(super) blocks: sled::Tree,
    pub(super) chain: sled::Tree,
    pub(super) txs: sled::Tree,
    pub(super) receipts: sled::Tree,
    pub(super) meta: sled::Tree,
    // Read cache in front of the blocks tree
    pub(super) block_cache: Mutex<LruCache<Hash, Block>>,
    // Canonical tip, updated only through set_latest
    pub(super) best: RwLock<Option<Arc<Block>>>,
}

impl SledChainStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let db = sled::open(path)?;
        let store = SledChainStore {
            blocks: db.open_tree("blocks")?,
            chain: db.open_tree("chain")?,
            txs: db.open_tree("txs")?,
            receipts: db.open_tree("receipts")?,
            meta: db.open_tree("meta")?,
            db,
            block_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_BLOCK_CACHE_SIZE).unwrap(),
            )),
            best: RwLock::new(None),
        };
        store.load_best()?;
        Ok(store)
    }

    // Rebuild the best block cache from the persisted latest pointer
    fn load_best(&self) -> Result<(), ChainError> {
        let Some(raw) = self.meta.get(LATEST_KEY)? else {
            debug!("no latest pointer yet, store is uninitialized");
            return Ok(());
        };
        let no = u64::from_be_bytes(
            raw.as_ref()
                .try_into()
                .map_err(|_| ChainError::NoChainStore)?,
        );
        let hash_raw = self
            .chain
            .get(no.to_be_bytes())?
            .ok_or(ChainError::BlockNoNotFound(no))?;
        let hash = Hash::from_bytes(&hash_raw)?;
        let raw_block = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or(ChainError::BlockNotFound(hash))?;
        let block = Block::from_bytes(&raw_block)?;
        trace!("loaded best block {} from disk", block);
        *self.best.write().unwrap() = Some(Arc::new(block));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.best.read().unwrap().is_some()
    }
}

#[async_trait]
impl ChainStore for SledChainStore {
    async fn commit(&self, batch: StoreBatch) -> Result<(), ChainError> {
        let StoreBatch {
            blocks,
            chain,
            txs,
            receipts,
            meta,
            ..
        } = batch;
        self.blocks.apply_batch(blocks)?;
        self.chain.apply_batch(chain)?;
        self.txs.apply_batch(txs)?;
        self.receipts.apply_batch(receipts)?;
        // latest pointer lands last: readers never see it ahead of
        // the chain index it refers to
        self.meta.apply_batch(meta)?;
        Ok(())
    }
}
