mod block_fetcher;
mod block_processor;
mod finder;
mod hash_fetcher;
mod peer;

pub use block_fetcher::BlockFetcher;
pub use block_processor::BlockProcessor;
pub use finder::Finder;
pub use hash_fetcher::{HashBatch, HashFetcher};
pub use peer::{PeerSet, SyncPeer};

use crate::{
    bus::{BlockInfo, ChainHandle, FetcherKind, OutboundSender, PeerId, SyncEvent},
    config::MAX_BLOCK_PENDING_TASKS,
    core::error::ChainError,
};
use log::{debug, info, warn};
use metrics::counter;
use stele_common::block::BlockNo;
use tokio::sync::{mpsc, watch};

const SUBTASK_MAILBOX: usize = 64;

// One sync session: who we are syncing against and how far
#[derive(Clone, Debug)]
pub struct SyncContext {
    pub peer: PeerId,
    pub target_no: BlockNo,
    pub best_no_at_start: BlockNo,
    pub common_ancestor: Option<BlockInfo>,
    pub total_count: u64,
}

// Channels into the live sub-tasks of a session. Dropping them (plus
// flipping the quit watch) tears the pipeline down.
struct SyncSession {
    quit: watch::Sender<bool>,
    finder_tx: Option<mpsc::Sender<SyncEvent>>,
    hash_tx: Option<mpsc::Sender<SyncEvent>>,
    fetcher_tx: Option<mpsc::Sender<SyncEvent>>,
}

// Drives the three-stage sync pipeline: finder, then hash fetcher
// plus block fetcher. Owns the session context, routes inbound peer
// responses to whichever stage they belong to and resets everything
// on any protocol failure. While no session is active every inbound
// sync message is discarded.
pub struct SyncManager {
    chain: ChainHandle,
    outbound: OutboundSender,
    events_tx: mpsc::Sender<SyncEvent>,
    // extra download peers joining the initiator for block fetching
    peers: Vec<PeerId>,
    ctx: Option<SyncContext>,
    session: Option<SyncSession>,
}

impl SyncManager {
    pub fn new(
        chain: ChainHandle,
        outbound: OutboundSender,
        events_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        SyncManager {
            chain,
            outbound,
            events_tx,
            peers: Vec::new(),
            ctx: None,
            session: None,
        }
    }

    pub fn with_peers(mut self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.peers = peers.into_iter().collect();
        self
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SyncEvent>) {
        info!("sync engine started");
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        info!("sync engine stopped");
    }

    pub async fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Start { peer, target_no } => self.handle_start(peer, target_no).await,
            SyncEvent::FinderResult { ancestor, err } => {
                self.handle_finder_result(ancestor, err).await
            }
            SyncEvent::Stop { from, err } => {
                debug!("sync stop from {:?}", from);
                self.reset(err).await;
            }
            SyncEvent::CloseFetcher { from } => self.close_fetcher(from),
            event @ SyncEvent::AncestorRsp { .. } => self.route_finder(event).await,
            event @ SyncEvent::HashesRsp { .. } => self.route_hash(event).await,
            event @ (SyncEvent::BlockChunksRsp { .. } | SyncEvent::AddBlockRsp { .. }) => {
                self.route_fetcher(event).await
            }
        }
    }

    async fn handle_start(&mut self, peer: PeerId, target_no: BlockNo) {
        if self.ctx.is_some() {
            debug!("sync already running, ignoring start for {}", target_no);
            return;
        }

        // failing to read our own tip aborts the whole attempt
        let best = match self.chain.get_best_block().await {
            Ok(best) => best,
            Err(e) => {
                warn!("cannot read best block, sync aborted: {}", e);
                return;
            }
        };
        if target_no <= best.block_no {
            debug!(
                "already at {} >= sync target {}, nothing to do",
                best.block_no, target_no
            );
            return;
        }

        info!(
            "sync starts: peer {}, target {}, local tip {}",
            peer, target_no, best.block_no
        );
        counter!("stele_sync_sessions").increment(1);

        let (quit_tx, quit_rx) = watch::channel(false);
        let (finder_tx, finder_rx) = mpsc::channel(SUBTASK_MAILBOX);
        self.ctx = Some(SyncContext {
            peer: peer.clone(),
            target_no,
            best_no_at_start: best.block_no,
            common_ancestor: None,
            total_count: 0,
        });
        self.session = Some(SyncSession {
            quit: quit_tx,
            finder_tx: Some(finder_tx),
            hash_tx: None,
            fetcher_tx: None,
        });

        let finder = Finder {
            chain: self.chain.clone(),
            outbound: self.outbound.clone(),
            events_tx: self.events_tx.clone(),
            rx: finder_rx,
            quit: quit_rx,
            peer,
            best_no: best.block_no,
        };
        tokio::spawn(finder.run());
    }

    async fn handle_finder_result(&mut self, ancestor: Option<BlockInfo>, err: Option<String>) {
        let Some(ctx) = self.ctx.as_mut() else {
            debug!("finder result without a session, discarding");
            return;
        };
        if let Some(err) = err {
            warn!("finder failed: {}", err);
            self.reset(Some(ChainError::FinderInternal(err).to_string()))
                .await;
            return;
        }
        let Some(ancestor) = ancestor else {
            warn!("no common ancestor with {}", ctx.peer);
            self.reset(Some(
                ChainError::FinderInternal("no common ancestor".to_string()).to_string(),
            ))
            .await;
            return;
        };

        info!(
            "common ancestor {} at {}, fetching up to {}",
            ancestor.hash, ancestor.no, ctx.target_no
        );
        ctx.total_count = ctx.target_no - ancestor.no;
        ctx.common_ancestor = Some(ancestor.clone());

        let session = self.session.as_mut().expect("session exists with context");
        session.finder_tx = None;

        let (hash_tx, hash_rx) = mpsc::channel(SUBTASK_MAILBOX);
        let (fetcher_tx, fetcher_rx) = mpsc::channel(SUBTASK_MAILBOX);
        let (hf_tx, hf_rx) = mpsc::channel(MAX_BLOCK_PENDING_TASKS);
        session.hash_tx = Some(hash_tx);
        session.fetcher_tx = Some(fetcher_tx);

        let hash_fetcher = HashFetcher {
            outbound: self.outbound.clone(),
            events_tx: self.events_tx.clone(),
            rx: hash_rx,
            quit: session.quit.subscribe(),
            peer: ctx.peer.clone(),
            ancestor: ancestor.clone(),
            target_no: ctx.target_no,
            hf_tx,
        };
        tokio::spawn(hash_fetcher.run());

        let mut download_peers = vec![ctx.peer.clone()];
        download_peers.extend(self.peers.iter().filter(|p| **p != ctx.peer).cloned());
        let fetcher = BlockFetcher::new(
            self.chain.clone(),
            self.outbound.clone(),
            self.events_tx.clone(),
            fetcher_rx,
            session.quit.subscribe(),
            hf_rx,
            PeerSet::new(download_peers),
            ancestor,
            ctx.target_no,
        );
        tokio::spawn(fetcher.run());
    }

    fn close_fetcher(&mut self, from: FetcherKind) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        debug!("closing {:?}", from);
        match from {
            FetcherKind::Finder => session.finder_tx = None,
            FetcherKind::HashFetcher => session.hash_tx = None,
            FetcherKind::BlockFetcher => session.fetcher_tx = None,
        }
    }

    // Drop the context, stop every sub-task and discard inbound sync
    // messages until the next SyncStart
    async fn reset(&mut self, err: Option<String>) {
        match &err {
            Some(e) => {
                warn!("sync reset: {}", e);
                counter!("stele_sync_failures").increment(1);
            }
            None => info!("sync finished"),
        }
        if let Some(session) = self.session.take() {
            let _ = session.quit.send(true);
        }
        self.ctx = None;
    }

    async fn route_finder(&mut self, event: SyncEvent) {
        let target = self.session.as_ref().and_then(|s| s.finder_tx.clone());
        Self::route(target, event).await;
    }

    async fn route_hash(&mut self, event: SyncEvent) {
        let target = self.session.as_ref().and_then(|s| s.hash_tx.clone());
        Self::route(target, event).await;
    }

    async fn route_fetcher(&mut self, event: SyncEvent) {
        let target = self.session.as_ref().and_then(|s| s.fetcher_tx.clone());
        Self::route(target, event).await;
    }

    async fn route(target: Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
        match target {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!("sync sub-task is gone, message dropped");
                }
            }
            None => debug!("no sync session, discarding {:?}", event),
        }
    }

    pub fn context(&self) -> Option<&SyncContext> {
        self.ctx.as_ref()
    }
}
