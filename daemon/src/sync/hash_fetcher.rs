use crate::{
    bus::{BlockInfo, FetcherKind, Outbound, OutboundSender, PeerId, SyncEvent},
    config::{DFLT_HASH_REQ_SIZE, FETCH_TIMEOUT},
    core::error::ChainError,
};
use log::{debug, trace};
use stele_common::block::BlockNo;
use tokio::{
    select,
    sync::{mpsc, watch},
    time::sleep,
};

// One contiguous batch of block hashes handed to the block fetcher
#[derive(Debug)]
pub struct HashBatch {
    pub hashes: Vec<stele_common::crypto::Hash>,
    pub count: usize,
}

// Pulls block-hash ranges from the chosen peer, walking from
// ancestor+1 toward the sync target in rounds of DFLT_HASH_REQ_SIZE.
// Each round lands in the block fetcher's channel; dropping the
// sender when done tells the fetcher no more hashes are coming.
pub struct HashFetcher {
    pub outbound: OutboundSender,
    pub events_tx: mpsc::Sender<SyncEvent>,
    pub rx: mpsc::Receiver<SyncEvent>,
    pub quit: watch::Receiver<bool>,
    pub peer: PeerId,
    pub ancestor: BlockInfo,
    pub target_no: BlockNo,
    pub hf_tx: mpsc::Sender<HashBatch>,
}

impl HashFetcher {
    pub async fn run(mut self) {
        if let Err(e) = self.fetch().await {
            if matches!(e, ChainError::Quit) {
                debug!("hash fetcher quitting");
                return;
            }
            let _ = self
                .events_tx
                .send(SyncEvent::CloseFetcher {
                    from: FetcherKind::HashFetcher,
                })
                .await;
            let _ = self
                .events_tx
                .send(SyncEvent::Stop {
                    from: FetcherKind::HashFetcher,
                    err: Some(e.to_string()),
                })
                .await;
        }
        // hf_tx drops here, closing the channel toward the fetcher
    }

    async fn fetch(&mut self) -> Result<(), ChainError> {
        let mut prev = self.ancestor.clone();
        while prev.no < self.target_no {
            let count = (self.target_no - prev.no).min(DFLT_HASH_REQ_SIZE);
            trace!("requesting {} hashes above {:?}", count, prev);
            self.outbound.send(Outbound::GetHashes {
                peer: self.peer.clone(),
                prev: prev.clone(),
                count,
            });

            let hashes = self.wait_response().await?;
            if hashes.is_empty() || hashes.len() as u64 > count {
                return Err(ChainError::SyncMessage(format!(
                    "peer sent {} hashes, asked for at most {}",
                    hashes.len(),
                    count
                )));
            }

            let got = hashes.len();
            prev = BlockInfo {
                hash: hashes[got - 1].clone(),
                no: prev.no + got as u64,
            };
            if self
                .hf_tx
                .send(HashBatch {
                    hashes,
                    count: got,
                })
                .await
                .is_err()
            {
                // the block fetcher is gone, nothing left to feed
                return Err(ChainError::Quit);
            }
        }
        debug!("hash fetcher reached target {}", self.target_no);
        Ok(())
    }

    async fn wait_response(&mut self) -> Result<Vec<stele_common::crypto::Hash>, ChainError> {
        select! {
            _ = self.quit.changed() => Err(ChainError::Quit),
            msg = self.rx.recv() => match msg {
                Some(SyncEvent::HashesRsp { hashes, .. }) => Ok(hashes),
                Some(other) => Err(ChainError::SyncMessage(format!(
                    "hash fetcher got unexpected {:?}",
                    other
                ))),
                None => Err(ChainError::Quit),
            },
            _ = sleep(FETCH_TIMEOUT) => {
                Err(ChainError::SyncMessage("hash request timed out".to_string()))
            }
        }
    }
}
