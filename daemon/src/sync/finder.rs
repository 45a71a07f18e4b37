use crate::{
    bus::{BlockInfo, ChainHandle, Outbound, OutboundSender, PeerId, SyncEvent},
    config::FINDER_TIMEOUT,
    core::error::ChainError,
};
use log::{debug, trace, warn};
use stele_common::block::BlockNo;
use tokio::{
    select,
    sync::{mpsc, watch},
    time::sleep,
};

// Ancestor discovery against one remote peer: first a geometric
// candidate set (the chain anchors), then a linear backward scan if
// nothing matched. Whatever happens, exactly one FinderResult goes
// back to the sync manager.
pub struct Finder {
    pub chain: ChainHandle,
    pub outbound: OutboundSender,
    pub events_tx: mpsc::Sender<SyncEvent>,
    pub rx: mpsc::Receiver<SyncEvent>,
    pub quit: watch::Receiver<bool>,
    pub peer: PeerId,
    pub best_no: BlockNo,
}

impl Finder {
    pub async fn run(mut self) {
        let result = self.find().await;
        let event = match result {
            Ok(ancestor) => SyncEvent::FinderResult {
                ancestor,
                err: None,
            },
            Err(e) => SyncEvent::FinderResult {
                ancestor: None,
                err: Some(e.to_string()),
            },
        };
        if self.events_tx.send(event).await.is_err() {
            debug!("sync manager is gone, dropping finder result");
        }
    }

    async fn find(&mut self) -> Result<Option<BlockInfo>, ChainError> {
        // stage 1: geometric candidates, newest first
        let anchors = self.chain.get_anchors().await?;
        trace!("finder sends {} anchor candidates to {}", anchors.len(), self.peer);
        self.outbound.send(Outbound::GetSyncAncestor {
            peer: self.peer.clone(),
            hashes: anchors.iter().map(|info| info.hash.clone()).collect(),
        });
        if let Some(ancestor) = self.wait_response().await? {
            debug!("anchor scan found common ancestor {:?}", ancestor);
            return Ok(Some(ancestor));
        }

        // stage 2: linear backward scan until a match or genesis
        warn!("no anchor matched, falling back to linear scan");
        let mut no = self.best_no;
        loop {
            let hash = self.chain.get_hash_by_no(no).await?;
            self.outbound.send(Outbound::GetSyncAncestor {
                peer: self.peer.clone(),
                hashes: vec![hash],
            });
            if let Some(ancestor) = self.wait_response().await? {
                debug!("linear scan found common ancestor {:?}", ancestor);
                return Ok(Some(ancestor));
            }
            if no == 0 {
                return Ok(None);
            }
            no -= 1;
        }
    }

    async fn wait_response(&mut self) -> Result<Option<BlockInfo>, ChainError> {
        select! {
            _ = self.quit.changed() => Err(ChainError::Quit),
            msg = self.rx.recv() => match msg {
                Some(SyncEvent::AncestorRsp { ancestor, .. }) => Ok(ancestor),
                Some(other) => Err(ChainError::SyncMessage(format!(
                    "finder got unexpected {:?}",
                    other
                ))),
                None => Err(ChainError::Quit),
            },
            _ = sleep(FINDER_TIMEOUT) => {
                Err(ChainError::FinderInternal("ancestor request timed out".to_string()))
            }
        }
    }
}
