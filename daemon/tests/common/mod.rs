#![allow(dead_code)]

use std::sync::Arc;
use stele_common::{
    block::{compute_txs_root, Block, BlockHeader},
    config::COINBASE_FEE,
    crypto::{Address, Hash, Hashable},
    genesis::Genesis,
    transaction::{Transaction, TxBody, TxType},
};
use stele_daemon::{
    bus::{Outbound, OutboundSender},
    config::ChainConfig,
    core::{
        chain::ChainManager,
        consensus::LongestChain,
        executor::execute_tx,
        storage::SledChainStore,
        vm::KvRuntime,
    },
};
use tempdir::TempDir;
use tokio::sync::mpsc;

pub const FEE: u64 = COINBASE_FEE;

// A chain manager over a throwaway store, driven directly (no actor
// loop) the way the node's mailbox would drive it
pub struct TestChain {
    pub chain: ChainManager<SledChainStore>,
    pub outbound_rx: mpsc::Receiver<Outbound>,
    _dir: TempDir,
}

impl TestChain {
    pub async fn start(genesis: Genesis) -> Self {
        let dir = TempDir::new("stele-test").expect("temp dir");
        let store = SledChainStore::open(dir.path()).expect("open store");
        let (out_tx, out_rx) = mpsc::channel(1024);
        let mut chain = ChainManager::new(
            store,
            Arc::new(LongestChain),
            Arc::new(KvRuntime),
            OutboundSender::new(out_tx),
            ChainConfig::dev(),
        );
        chain.init(&genesis).await.expect("init genesis");
        TestChain {
            chain,
            outbound_rx: out_rx,
            _dir: dir,
        }
    }

    pub fn next_nonce(&self, name: &str) -> u64 {
        self.chain
            .state_db()
            .block_state()
            .get_account(&Address::from_name(name).id())
            .nonce
            + 1
    }

    pub fn transfer(&self, from: &str, to: &str, amount: u64) -> Transaction {
        Transaction::new(TxBody::new(
            self.next_nonce(from),
            Address::from_name(from),
            Address::from_name(to),
            amount,
            Vec::new(),
            TxType::Normal,
        ))
    }

    pub fn deploy(&self, from: &str, payload: &[u8]) -> Transaction {
        Transaction::new(TxBody::new(
            self.next_nonce(from),
            Address::from_name(from),
            Address::empty(),
            0,
            payload.to_vec(),
            TxType::Normal,
        ))
    }

    pub fn call(&self, from: &str, contract: &Address, payload: &[u8]) -> Transaction {
        Transaction::new(TxBody::new(
            self.next_nonce(from),
            Address::from_name(from),
            contract.clone(),
            0,
            payload.to_vec(),
            TxType::Normal,
        ))
    }

    // Producer-side block building: execute against a scratch block
    // state to learn the roots the header must commit to
    pub async fn produce_block(&self, txs: Vec<Transaction>) -> Block {
        let best = self.chain.best_block().await.expect("best block");
        let block_no = best.block_no + 1;
        let timestamp = best.timestamp + 1;
        let coinbase = Address::from_name("bp");

        let mut state = self.chain.state_db().block_state();
        for tx in &txs {
            execute_tx(&KvRuntime, &mut state, tx, block_no, timestamp, false)
                .expect("producer tx must execute");
        }
        let reward = state.bp_reward();
        if reward > 0 {
            let mut account = state.get_account(&coinbase.id());
            account.add_balance(reward);
            state.put_account(coinbase.id(), account);
        }
        state.save_recovery_point(block_no);
        let root = state.update(block_no).expect("state update");

        let txs: Vec<Arc<Transaction>> = txs.into_iter().map(Arc::new).collect();
        let header = BlockHeader::new(
            block_no,
            best.hash(),
            root,
            compute_txs_root(&txs),
            state.receipts_root(),
            timestamp,
            coinbase,
        );
        Block::new(header, txs)
    }

    // Block with broken commitments, for exercising failure paths
    pub async fn produce_invalid_block(&self, txs: Vec<Transaction>) -> Block {
        let best = self.chain.best_block().await.expect("best block");
        let txs: Vec<Arc<Transaction>> = txs.into_iter().map(Arc::new).collect();
        let header = BlockHeader::new(
            best.block_no + 1,
            best.hash(),
            Hash::zero(),
            compute_txs_root(&txs),
            Hash::zero(),
            best.timestamp + 1,
            Address::from_name("bp"),
        );
        Block::new(header, txs)
    }

    pub async fn commit_block(&mut self, txs: Vec<Transaction>) -> Block {
        let block = self.produce_block(txs).await;
        self.chain
            .add_block(block.clone(), None, None)
            .await
            .expect("commit block");
        block
    }

    pub fn balance(&self, name: &str) -> u64 {
        self.chain
            .state_db()
            .block_state()
            .get_account(&Address::from_name(name).id())
            .balance
    }

    pub async fn latest_no(&self) -> u64 {
        self.chain.best_block().await.expect("best block").block_no
    }
}

pub fn dev_genesis(balances: &[(&str, u64)]) -> Genesis {
    let mut genesis = Genesis::dev("stele-test", 1_700_000_000);
    for (name, balance) in balances {
        genesis = genesis.with_balance(name, *balance);
    }
    genesis
}

// Chain-shape invariants P1/P2: every canonical height resolves to a
// block at that height, hash-connected to its predecessor
pub async fn assert_canonical_chain(chain: &ChainManager<SledChainStore>) {
    use stele_daemon::core::storage::{BlockProvider, ChainProvider};

    let store = chain.store();
    let latest = store.get_best_block().await.unwrap().block_no;
    let mut prev_hash: Option<Hash> = None;
    for no in 0..=latest {
        let hash = store.get_hash_by_no(no).await.unwrap();
        let block = store.get_block(&hash).await.unwrap();
        assert_eq!(block.block_no, no, "height index must round-trip");
        if let Some(prev) = prev_hash {
            assert_eq!(block.prev_hash, prev, "canonical chain must be hash-connected");
        }
        prev_hash = Some(block.hash());
    }
}
