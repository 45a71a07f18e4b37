use stele_common::{
    block::BlockNo,
    crypto::Hash,
    serializer::ReaderError,
    transaction::TxValidationError,
};
use thiserror::Error;

use crate::core::vm::VmError;

#[derive(Debug, Error)]
pub enum ChainError {
    // Transaction validation: rejected, never retried
    #[error("invalid tx nonce: expected {expected}, got {got}")]
    InvalidTxNonce { expected: u64, got: u64 },

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("invalid tx type")]
    InvalidTxType,

    #[error(transparent)]
    InvalidTx(#[from] TxValidationError),

    // Block validation
    #[error("invalid block {0}: {1}")]
    InvalidBlock(Hash, String),

    #[error("block {0} is orphan")]
    BlockOrphan(Hash),

    // VM execution failures are absorbed into receipts by the tx
    // executor, they never abort a block on their own
    #[error("vm error: {0}")]
    Vm(#[from] VmError),

    #[error("governance: {0}")]
    Governance(String),

    // Sync protocol: any of these resets the whole sync session
    #[error("invalid sync message: {0}")]
    SyncMessage(String),

    #[error("finder failed: {0}")]
    FinderInternal(String),

    #[error("every sync peer is blacklisted")]
    AllPeersBad,

    #[error("sync is shutting down")]
    Quit,

    #[error("no running task matches the response from {0}")]
    TaskMismatch(String),

    #[error("fetched blocks are not hash connected")]
    BrokenHashChain,

    // Storage and invariant breaches: fatal, the chain actor halts
    #[error("chain store is not initialized")]
    NoChainStore,

    #[error("block not found: {0}")]
    BlockNotFound(Hash),

    #[error("no block at height {0}")]
    BlockNoNotFound(BlockNo),

    #[error("tx not found: {0}")]
    TxNotFound(Hash),

    #[error("receipt index {idx} out of range for block {block}")]
    InvalidReceiptIndex { block: Hash, idx: usize },

    #[error("swap chain is not longer than the canonical chain")]
    InvalidSwapChain,

    #[error("state root mismatch: expected {expected}, got {got}")]
    StateRootMismatch { expected: Hash, got: Hash },

    #[error("unknown state root {0}")]
    UnknownStateRoot(Hash),

    // Consensus-originated, non-fatal during reorg
    #[error("consensus: {0}")]
    Consensus(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("decode error: {0}")]
    Decode(#[from] ReaderError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl ChainError {
    // Classifier used by the tx executor to absorb VM failures into
    // receipts instead of failing the block
    pub fn is_vm_error(&self) -> bool {
        matches!(self, ChainError::Vm(_))
    }

    // Consensus-origin reorg failures are logged, everything else
    // aborting a reorg is an invariant breach
    pub fn is_consensus(&self) -> bool {
        matches!(self, ChainError::Consensus(_))
    }
}
