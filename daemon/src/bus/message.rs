use crate::core::{error::ChainError, storage::TxIdx};
use log::{debug, warn};
use std::time::Duration;
use stele_common::{
    block::{Block, BlockNo},
    crypto::Hash,
    receipt::Receipt,
    transaction::Transaction,
};
use tokio::sync::{mpsc, oneshot};

// Every task is addressed by typed messages over bounded channels.
// Request/response pairs carry a oneshot responder, notifications are
// fire-and-forget.

pub type PeerId = String;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: Hash,
    pub no: BlockNo,
}

// Mailbox of the chain manager actor. All chain mutations and reads
// are serialized through it.
pub enum ChainRequest {
    AddBlock {
        block: Block,
        peer: Option<PeerId>,
        resp: oneshot::Sender<Result<BlockInfo, ChainError>>,
    },
    GetBlock {
        hash: Hash,
        resp: oneshot::Sender<Result<Block, ChainError>>,
    },
    GetBlockByNo {
        no: BlockNo,
        resp: oneshot::Sender<Result<Block, ChainError>>,
    },
    GetBestBlock {
        resp: oneshot::Sender<Result<Block, ChainError>>,
    },
    GetHashByNo {
        no: BlockNo,
        resp: oneshot::Sender<Result<Hash, ChainError>>,
    },
    GetTx {
        hash: Hash,
        resp: oneshot::Sender<Result<(Transaction, TxIdx), ChainError>>,
    },
    GetReceipt {
        tx_hash: Hash,
        resp: oneshot::Sender<Result<Receipt, ChainError>>,
    },
    // Logarithmic sample of recent canonical hashes, newest first
    GetAnchors {
        resp: oneshot::Sender<Result<Vec<BlockInfo>, ChainError>>,
    },
}

// Identifies the sync sub-task a control message originates from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetcherKind {
    Finder,
    HashFetcher,
    BlockFetcher,
}

// Everything the sync engine consumes: the start trigger, peer
// responses relayed by the transport, and results bubbling up from
// its own sub-tasks.
#[derive(Debug)]
pub enum SyncEvent {
    Start {
        peer: PeerId,
        target_no: BlockNo,
    },
    AncestorRsp {
        peer: PeerId,
        ancestor: Option<BlockInfo>,
    },
    FinderResult {
        ancestor: Option<BlockInfo>,
        err: Option<String>,
    },
    HashesRsp {
        peer: PeerId,
        hashes: Vec<Hash>,
    },
    BlockChunksRsp {
        from: PeerId,
        blocks: Vec<Block>,
    },
    AddBlockRsp {
        block_hash: Hash,
        block_no: BlockNo,
        err: Option<String>,
    },
    CloseFetcher {
        from: FetcherKind,
    },
    Stop {
        from: FetcherKind,
        err: Option<String>,
    },
}

// Messages leaving the core toward the peer layer or local services.
// The transport (or the test harness) consumes these and feeds the
// answers back as ChainRequest / SyncEvent messages.
#[derive(Debug)]
pub enum Outbound {
    GetSyncAncestor {
        peer: PeerId,
        hashes: Vec<Hash>,
    },
    GetHashes {
        peer: PeerId,
        prev: BlockInfo,
        count: u64,
    },
    GetBlockChunks {
        peer: PeerId,
        hashes: Vec<Hash>,
        ttl: Duration,
    },
    GetMissingBlocks {
        peer: PeerId,
        anchors: Vec<BlockInfo>,
    },
    MemPoolDel {
        block_no: BlockNo,
        txs: Vec<Hash>,
    },
    BlockNotify {
        block: BlockInfo,
    },
}

// Cheap cloneable sender for notifications leaving the core. Sends
// never block the chain actor: a full queue drops the message.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        OutboundSender { tx }
    }

    pub fn send(&self, msg: Outbound) {
        if let Err(e) = self.tx.try_send(msg) {
            match e {
                mpsc::error::TrySendError::Full(msg) => {
                    warn!("outbound queue full, dropping {:?}", msg)
                }
                mpsc::error::TrySendError::Closed(msg) => {
                    debug!("outbound queue closed, dropping {:?}", msg)
                }
            }
        }
    }
}

// Request/response wrapper around the chain actor mailbox
#[derive(Clone)]
pub struct ChainHandle {
    tx: mpsc::Sender<ChainRequest>,
}

impl ChainHandle {
    pub fn new(tx: mpsc::Sender<ChainRequest>) -> Self {
        ChainHandle { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ChainError>>) -> ChainRequest,
    ) -> Result<T, ChainError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(make(resp))
            .await
            .map_err(|_| ChainError::ChannelClosed("chain mailbox"))?;
        rx.await
            .map_err(|_| ChainError::ChannelClosed("chain response"))?
    }

    pub async fn add_block(
        &self,
        block: Block,
        peer: Option<PeerId>,
    ) -> Result<BlockInfo, ChainError> {
        self.request(|resp| ChainRequest::AddBlock { block, peer, resp })
            .await
    }

    pub async fn get_block(&self, hash: Hash) -> Result<Block, ChainError> {
        self.request(|resp| ChainRequest::GetBlock { hash, resp })
            .await
    }

    pub async fn get_block_by_no(&self, no: BlockNo) -> Result<Block, ChainError> {
        self.request(|resp| ChainRequest::GetBlockByNo { no, resp })
            .await
    }

    pub async fn get_best_block(&self) -> Result<Block, ChainError> {
        self.request(|resp| ChainRequest::GetBestBlock { resp })
            .await
    }

    pub async fn get_hash_by_no(&self, no: BlockNo) -> Result<Hash, ChainError> {
        self.request(|resp| ChainRequest::GetHashByNo { no, resp })
            .await
    }

    pub async fn get_tx(&self, hash: Hash) -> Result<(Transaction, TxIdx), ChainError> {
        self.request(|resp| ChainRequest::GetTx { hash, resp }).await
    }

    pub async fn get_receipt(&self, tx_hash: Hash) -> Result<Receipt, ChainError> {
        self.request(|resp| ChainRequest::GetReceipt { tx_hash, resp })
            .await
    }

    pub async fn get_anchors(&self) -> Result<Vec<BlockInfo>, ChainError> {
        self.request(|resp| ChainRequest::GetAnchors { resp }).await
    }
}
