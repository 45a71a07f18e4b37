mod common;

use common::{dev_genesis, TestChain, FEE};
use std::{sync::Arc, time::Duration};
use stele_common::{crypto::Hashable, genesis::Genesis};
use stele_daemon::{
    bus::{BlockInfo, ChainHandle, Outbound, OutboundSender, SyncEvent},
    config::{ChainConfig, CHAIN_MAILBOX_SIZE, SYNC_MAILBOX_SIZE},
    core::{
        chain::ChainManager,
        consensus::LongestChain,
        error::ChainError,
        storage::{BlockProvider, ChainProvider, SledChainStore},
        vm::KvRuntime,
    },
    sync::SyncManager,
};
use tempdir::TempDir;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};

// Spawn a node the way the daemon wires it: chain actor + sync engine
// over typed channels, outbound queue handed back to the test
async fn spawn_node(
    genesis: &Genesis,
) -> (
    ChainHandle,
    mpsc::Sender<SyncEvent>,
    mpsc::Receiver<Outbound>,
    TempDir,
) {
    let dir = TempDir::new("stele-sync-test").unwrap();
    let store = SledChainStore::open(dir.path()).unwrap();
    let (out_tx, out_rx) = mpsc::channel(1024);
    let (chain_tx, chain_rx) = mpsc::channel(CHAIN_MAILBOX_SIZE);
    let (sync_tx, sync_rx) = mpsc::channel(SYNC_MAILBOX_SIZE);
    let outbound = OutboundSender::new(out_tx);

    let mut chain = ChainManager::new(
        store,
        Arc::new(LongestChain),
        Arc::new(KvRuntime),
        outbound.clone(),
        ChainConfig::dev(),
    );
    chain.set_sync_events(sync_tx.clone());
    chain.init(genesis).await.unwrap();

    let handle = ChainHandle::new(chain_tx);
    let syncer = SyncManager::new(handle.clone(), outbound, sync_tx.clone());
    tokio::spawn(chain.run(chain_rx));
    tokio::spawn(syncer.run(sync_rx));
    (handle, sync_tx, out_rx, dir)
}

// Script the remote side: answer sync requests out of a peer chain
fn serve_peer(
    mut out_rx: mpsc::Receiver<Outbound>,
    sync_tx: mpsc::Sender<SyncEvent>,
    peer: TestChain,
) {
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match msg {
                Outbound::GetSyncAncestor { peer: peer_id, hashes } => {
                    // highest candidate we hold canonically
                    let mut ancestor: Option<BlockInfo> = None;
                    for hash in &hashes {
                        let Ok(block) = peer.chain.store().get_block(hash).await else {
                            continue;
                        };
                        let canonical =
                            peer.chain.store().get_hash_by_no(block.block_no).await.ok();
                        if canonical == Some(block.hash()) {
                            let info = BlockInfo {
                                hash: block.hash(),
                                no: block.block_no,
                            };
                            if ancestor.as_ref().map_or(true, |a| info.no > a.no) {
                                ancestor = Some(info);
                            }
                        }
                    }
                    let _ = sync_tx
                        .send(SyncEvent::AncestorRsp {
                            peer: peer_id,
                            ancestor,
                        })
                        .await;
                }
                Outbound::GetHashes {
                    peer: peer_id,
                    prev,
                    count,
                } => {
                    let best = peer.latest_no().await;
                    let mut hashes = Vec::new();
                    let mut no = prev.no + 1;
                    while no <= best && (hashes.len() as u64) < count {
                        hashes.push(peer.chain.store().get_hash_by_no(no).await.unwrap());
                        no += 1;
                    }
                    let _ = sync_tx
                        .send(SyncEvent::HashesRsp {
                            peer: peer_id,
                            hashes,
                        })
                        .await;
                }
                Outbound::GetBlockChunks {
                    peer: peer_id,
                    hashes,
                    ..
                } => {
                    let mut blocks = Vec::new();
                    for hash in &hashes {
                        blocks.push(peer.chain.store().get_block(hash).await.unwrap());
                    }
                    let _ = sync_tx
                        .send(SyncEvent::BlockChunksRsp {
                            from: peer_id,
                            blocks,
                        })
                        .await;
                }
                _ => {}
            }
        }
    });
}

async fn wait_for_height(handle: &ChainHandle, no: u64) {
    timeout(Duration::from_secs(10), async {
        loop {
            let best = handle.get_best_block().await.unwrap();
            if best.block_no >= no {
                return;
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("node never reached height {}", no));
}

#[tokio::test]
async fn test_orphan_starts_sync_and_fills_gap() {
    let genesis = dev_genesis(&[("alice", 100 * FEE)]);
    let mut peer = TestChain::start(genesis.clone()).await;
    for _ in 0..5 {
        peer.commit_block(vec![peer.transfer("alice", "bob", FEE)]).await;
    }
    let tip = peer.chain.best_block().await.unwrap();

    let (handle, sync_tx, out_rx, _dir) = spawn_node(&genesis).await;
    serve_peer(out_rx, sync_tx, peer);

    // the tip arrives out of the blue: orphan, sync kicks in
    let err = handle
        .add_block(tip.clone(), Some("peer1".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::BlockOrphan(_)));

    wait_for_height(&handle, 5).await;
    let best = handle.get_best_block().await.unwrap();
    assert_eq!(best.hash(), tip.hash());
    // the whole range is canonical and hash-connected
    for no in 1..=5 {
        let block = handle.get_block_by_no(no).await.unwrap();
        assert_eq!(block.block_no, no);
    }
}

#[tokio::test]
async fn test_sync_reorgs_to_heavier_peer_branch() {
    let genesis = dev_genesis(&[("alice", 100 * FEE), ("carol", 100 * FEE)]);
    let mut peer = TestChain::start(genesis.clone()).await;
    let (handle, sync_tx, out_rx, _dir) = spawn_node(&genesis).await;

    // shared prefix A
    let block_a = peer.commit_block(vec![peer.transfer("alice", "bob", FEE)]).await;
    handle.add_block(block_a, None).await.unwrap();

    // local continues alone with B
    let local_b = {
        // build B against the local node through a twin chain
        let mut twin = TestChain::start(genesis.clone()).await;
        let a = peer.chain.store().get_block_by_no(1).await.unwrap();
        twin.chain.add_block(a, None, None).await.unwrap();
        twin.commit_block(vec![twin.transfer("alice", "eve", FEE)]).await
    };
    handle.add_block(local_b.clone(), None).await.unwrap();
    assert_eq!(handle.get_best_block().await.unwrap().block_no, 2);

    // the peer's branch grows heavier: B' -> C' -> D'
    let block_b2 = peer.commit_block(vec![peer.transfer("carol", "dave", FEE)]).await;
    peer.commit_block(vec![peer.transfer("carol", "dave", FEE)]).await;
    let tip = peer.commit_block(vec![peer.transfer("carol", "dave", FEE)]).await;

    serve_peer(out_rx, sync_tx, peer);

    // peer announces its tip: orphan for us, sync + reorg follow
    let err = handle
        .add_block(tip.clone(), Some("peer1".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::BlockOrphan(_)));

    wait_for_height(&handle, 4).await;
    let best = handle.get_best_block().await.unwrap();
    assert_eq!(best.hash(), tip.hash());
    assert_eq!(
        handle.get_hash_by_no(2).await.unwrap(),
        block_b2.hash()
    );

    // the local-only tx fell out of the canonical index
    let old_tx = local_b.get_transactions()[0].hash().clone();
    assert!(handle.get_tx(old_tx).await.is_err());
}

#[tokio::test]
async fn test_sync_start_behind_tip_is_ignored() {
    let genesis = dev_genesis(&[("alice", 100 * FEE)]);
    let (handle, sync_tx, mut out_rx, _dir) = spawn_node(&genesis).await;

    sync_tx
        .send(SyncEvent::Start {
            peer: "peer1".to_string(),
            target_no: 0,
        })
        .await
        .unwrap();

    // no finder request may leave the node
    let quiet = timeout(Duration::from_millis(300), out_rx.recv()).await;
    assert!(quiet.is_err(), "unexpected outbound message: {:?}", quiet);
    assert_eq!(handle.get_best_block().await.unwrap().block_no, 0);
}

#[tokio::test]
async fn test_stale_sync_messages_are_discarded() {
    let genesis = dev_genesis(&[("alice", 100 * FEE)]);
    let mut peer = TestChain::start(genesis.clone()).await;
    for _ in 0..3 {
        peer.commit_block(vec![peer.transfer("alice", "bob", FEE)]).await;
    }
    let tip = peer.chain.best_block().await.unwrap();

    let (handle, sync_tx, out_rx, _dir) = spawn_node(&genesis).await;

    // responses without a session must be dropped on the floor
    sync_tx
        .send(SyncEvent::BlockChunksRsp {
            from: "peer1".to_string(),
            blocks: vec![tip.clone()],
        })
        .await
        .unwrap();
    sync_tx
        .send(SyncEvent::AddBlockRsp {
            block_hash: tip.hash(),
            block_no: tip.block_no,
            err: None,
        })
        .await
        .unwrap();

    // and a real session still works afterwards
    serve_peer(out_rx, sync_tx, peer);
    let _ = handle
        .add_block(tip.clone(), Some("peer1".to_string()))
        .await;
    wait_for_height(&handle, 3).await;
    assert_eq!(handle.get_best_block().await.unwrap().hash(), tip.hash());
}
