use crate::{
    bus::{Outbound, OutboundSender},
    core::{
        consensus::Consensus,
        error::ChainError,
        executor::{execute_tx, PreloadHandle},
        state::{BlockState, StateDb},
        storage::ChainStore,
        vm::ContractRuntime,
    },
};
use log::{debug, trace};
use metrics::counter;
use stele_common::{block::Block, crypto::Hashable};

// Orchestrates the execution of one block against the state DB:
// per-transaction execution with hard-failure rollback, coinbase
// reward, recovery point, post validation and the final commit.
pub struct BlockExecutor<'a, S: ChainStore> {
    pub store: &'a S,
    pub runtime: &'a dyn ContractRuntime,
    pub consensus: &'a dyn Consensus,
    pub outbound: &'a OutboundSender,
    pub verify_sigs: bool,
    pub preload: Option<&'a PreloadHandle>,
}

impl<'a, S: ChainStore> BlockExecutor<'a, S> {
    // A pre-populated block state (from the local producer) skips
    // re-execution and goes straight to post validation and commit.
    pub async fn execute(
        &self,
        state_db: &mut StateDb,
        block: &Block,
        prestate: Option<BlockState>,
    ) -> Result<(), ChainError> {
        let (mut state, commit_only) = match prestate {
            Some(state) => {
                trace!("commit-only execution for {}", block);
                (state, true)
            }
            None => {
                self.consensus.validate_block(block)?;
                (state_db.block_state(), false)
            }
        };

        if !commit_only {
            let txs = block.get_transactions();
            for (i, tx) in txs.iter().enumerate() {
                // advisory warm-up of the next transaction's accounts
                if let (Some(preload), Some(next)) = (self.preload, txs.get(i + 1)) {
                    preload.request(next.clone(), state_db.version(state.base_root())?);
                }

                let snapshot = state.snapshot();
                if let Err(e) = execute_tx(
                    self.runtime,
                    &mut state,
                    tx,
                    block.block_no,
                    block.timestamp,
                    self.verify_sigs,
                ) {
                    // hard failure: the tx (and the block) is invalid,
                    // discard its partial writes
                    state.rollback(snapshot);
                    return Err(e);
                }
            }

            self.send_reward_coinbase(&mut state, block);
            state.save_recovery_point(block.block_no);
            state_db.save_recovery_point(block.block_no, state.base_root());
            state.update(block.block_no)?;
        } else if state.root().is_err() {
            state.update(block.block_no)?;
        }

        let root = state.root()?.clone();
        self.consensus.validate_post(&root, state.receipts(), block)?;

        // Commit: persist the state version, move the head, write the
        // receipts and tell the mempool its txs are gone
        state_db.commit(&state)?;
        state_db.update_root(&state)?;

        let mut batch = self.store.batch();
        self.store
            .write_receipts(&mut batch, &block.hash(), block.block_no, state.receipts());
        self.store.commit(batch).await?;

        self.outbound.send(Outbound::MemPoolDel {
            block_no: block.block_no,
            txs: block
                .get_transactions()
                .iter()
                .map(|tx| tx.hash().clone())
                .collect(),
        });

        counter!("stele_blocks_executed").increment(1);
        debug!("executed {} with {} receipts", block, state.receipts().len());
        Ok(())
    }

    fn send_reward_coinbase(&self, state: &mut BlockState, block: &Block) {
        let reward = state.bp_reward();
        if reward == 0 || block.coinbase.is_empty() {
            return;
        }
        let coinbase_id = block.coinbase.id();
        let mut account = state.get_account(&coinbase_id);
        account.add_balance(reward);
        state.put_account(coinbase_id, account);
        trace!("coinbase {} credited {}", block.coinbase, reward);
    }
}
