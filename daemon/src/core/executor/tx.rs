use crate::core::{
    error::ChainError,
    state::BlockState,
    vm::{CallInfo, ContractRuntime, VmContext, VmError},
};
use log::{debug, warn};
use stele_common::{
    block::BlockNo,
    config::{COINBASE_FEE, GOVERNANCE_ACCOUNT},
    crypto::Address,
    receipt::Receipt,
    transaction::{contract_address, Transaction, TxType},
};

// Outcome of the VM leg of a transaction
enum VmOutcome {
    Created(Vec<u8>),
    Executed(Vec<u8>),
    PlainTransfer,
}

// Single-transaction state transition.
//
// Hard failures (validation, nonce, balance, governance) propagate and
// abort the block. VM failures are absorbed: the sender still pays the
// fee and burns the nonce, an error receipt is recorded and the block
// goes on.
pub fn execute_tx(
    runtime: &dyn ContractRuntime,
    state: &mut BlockState,
    tx: &Transaction,
    block_no: BlockNo,
    timestamp: i64,
    verify_sigs: bool,
) -> Result<(), ChainError> {
    tx.validate(verify_sigs)?;

    let sender_id = tx.sender().id();
    let mut sender = state.get_account(&sender_id);

    let expected = sender.nonce + 1;
    if tx.nonce() != expected {
        return Err(ChainError::InvalidTxNonce {
            expected,
            got: tx.nonce(),
        });
    }

    let fee = COINBASE_FEE;
    // Governance covers the amount per-operation: unstake returns
    // funds, only the fee must be liquid up front
    let need = match tx.tx_type() {
        TxType::Normal => tx.amount().saturating_add(fee),
        TxType::Governance => fee,
    };
    if sender.balance < need {
        return Err(ChainError::InsufficientBalance {
            need,
            have: sender.balance,
        });
    }

    match tx.tx_type() {
        TxType::Governance => execute_governance(state, tx, fee),
        TxType::Normal => {
            let need = tx.amount().saturating_add(fee);
            // Resolve the receiver: an empty recipient deploys the
            // payload at a synthesized address
            let creating = tx.recipient().is_empty();
            let receiver_address = if creating {
                contract_address(tx.sender(), tx.nonce())
            } else {
                tx.recipient().clone()
            };
            let receiver_id = receiver_address.id();
            if creating && state.account_exists(&receiver_id) {
                // synthesized addresses are unique per (sender, nonce)
                return Err(ChainError::InvalidBlock(
                    tx.hash().clone(),
                    format!("contract address {} already exists", receiver_address),
                ));
            }

            let snapshot = state.snapshot();

            sender.sub_balance(need);
            sender.nonce = tx.nonce();
            state.put_account(sender_id.clone(), sender);

            let mut receiver = state.get_account(&receiver_id);
            receiver.add_balance(tx.amount());
            state.put_account(receiver_id.clone(), receiver);

            let vm_result = run_vm(
                runtime,
                state,
                tx,
                &receiver_address,
                creating,
                block_no,
                timestamp,
            );

            match vm_result {
                Ok(outcome) => {
                    state.add_reward(fee);
                    let receipt = match outcome {
                        VmOutcome::Created(ret) => Receipt::created(receiver_address, ret),
                        VmOutcome::Executed(ret) => Receipt::success(receiver_address, ret),
                        VmOutcome::PlainTransfer => {
                            Receipt::success(receiver_address, Vec::new())
                        }
                    };
                    state.add_receipt(receipt);
                    Ok(())
                }
                Err(vm_err) => {
                    // VM errors do not fail block execution: restore
                    // the pre-call state, still charge the fee and
                    // burn the nonce, record the error receipt
                    debug!("absorbing vm error for {}: {}", tx, vm_err);
                    state.rollback(snapshot);

                    let mut sender = state.get_account(&sender_id);
                    sender.sub_balance(fee);
                    sender.nonce = tx.nonce();
                    state.put_account(sender_id, sender);

                    state.add_reward(fee);
                    state.add_receipt(Receipt::vm_error(receiver_address, vm_err.to_string()));
                    Ok(())
                }
            }
        }
    }
}

fn run_vm(
    runtime: &dyn ContractRuntime,
    state: &mut BlockState,
    tx: &Transaction,
    receiver_address: &Address,
    creating: bool,
    block_no: BlockNo,
    timestamp: i64,
) -> Result<VmOutcome, VmError> {
    if !creating && tx.payload().is_empty() {
        return Ok(VmOutcome::PlainTransfer);
    }

    let mut ctx = VmContext {
        contract: receiver_address.id(),
        contract_address: receiver_address.clone(),
        sender: tx.sender().clone(),
        block_no,
        timestamp,
        state,
    };

    if creating {
        runtime.create(&mut ctx, tx.payload()).map(VmOutcome::Created)
    } else {
        let call = CallInfo::parse(tx.payload())?;
        runtime.execute(&mut ctx, call).map(VmOutcome::Executed)
    }
}

// Built-in governance transitions against the system account. Errors
// here are surfaced: a block carrying an invalid governance tx fails.
fn execute_governance(
    state: &mut BlockState,
    tx: &Transaction,
    fee: u64,
) -> Result<(), ChainError> {
    let gov_address = Address::from_name(GOVERNANCE_ACCOUNT);
    if *tx.recipient() != gov_address {
        warn!("governance tx {} targets {}", tx, tx.recipient());
        return Err(ChainError::InvalidTxType);
    }

    let call = CallInfo::parse(tx.payload())
        .map_err(|e| ChainError::Governance(format!("bad payload: {}", e)))?;

    let sender_id = tx.sender().id();
    let gov_id = gov_address.id();
    let slot = stake_slot(tx.sender());
    let staked = state
        .get_storage(&gov_id, &slot)
        .map(|raw| u64::from_be_bytes(raw.try_into().unwrap_or_default()))
        .unwrap_or(0);

    let mut sender = state.get_account(&sender_id);
    let mut gov = state.get_account(&gov_id);

    match call.name.as_str() {
        "stake" => {
            let need = tx.amount().saturating_add(fee);
            if sender.balance < need {
                return Err(ChainError::InsufficientBalance {
                    need,
                    have: sender.balance,
                });
            }
            sender.sub_balance(need);
            gov.add_balance(tx.amount());
            state.set_storage(
                &gov_id,
                slot,
                (staked.saturating_add(tx.amount())).to_be_bytes().to_vec(),
            );
        }
        "unstake" => {
            if staked < tx.amount() {
                return Err(ChainError::Governance(format!(
                    "unstake of {} exceeds staked {}",
                    tx.amount(),
                    staked
                )));
            }
            sender.sub_balance(fee);
            sender.add_balance(tx.amount());
            gov.sub_balance(tx.amount());
            state.set_storage(&gov_id, slot, (staked - tx.amount()).to_be_bytes().to_vec());
        }
        other => {
            return Err(ChainError::Governance(format!(
                "unknown operation {}",
                other
            )))
        }
    }

    sender.nonce = tx.nonce();
    state.put_account(sender_id, sender);
    state.put_account(gov_id, gov);
    state.add_reward(fee);
    state.add_receipt(Receipt::success(gov_address, Vec::new()));
    Ok(())
}

fn stake_slot(sender: &Address) -> Vec<u8> {
    let mut slot = b"stake:".to_vec();
    slot.extend_from_slice(sender.as_bytes());
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{state::StateDb, vm::KvRuntime};
    use stele_common::{account::Account, transaction::TxBody};

    fn funded_state(db: &StateDb, name: &str, balance: u64) -> BlockState {
        let mut state = db.block_state();
        state.put_account(Address::from_name(name).id(), Account::new(balance));
        state
    }

    fn transfer(from: &str, to: &str, amount: u64, nonce: u64) -> Transaction {
        Transaction::new(TxBody::new(
            nonce,
            Address::from_name(from),
            Address::from_name(to),
            amount,
            Vec::new(),
            TxType::Normal,
        ))
    }

    #[test]
    fn test_transfer_moves_funds_and_fee() {
        let db = StateDb::new();
        let mut state = funded_state(&db, "alice", 100 + COINBASE_FEE);
        let tx = transfer("alice", "bob", 30, 1);
        execute_tx(&KvRuntime, &mut state, &tx, 1, 1, false).unwrap();

        assert_eq!(
            state.get_account(&Address::from_name("alice").id()).balance,
            70
        );
        assert_eq!(
            state.get_account(&Address::from_name("bob").id()).balance,
            30
        );
        assert_eq!(state.bp_reward(), COINBASE_FEE);
        assert_eq!(state.receipts().len(), 1);
        assert!(state.receipts()[0].is_success());
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let db = StateDb::new();
        let mut state = funded_state(&db, "alice", 5);
        let tx = transfer("alice", "bob", 10, 1);
        assert!(matches!(
            execute_tx(&KvRuntime, &mut state, &tx, 1, 1, false),
            Err(ChainError::InsufficientBalance { .. })
        ));
        // nothing changed
        assert_eq!(
            state.get_account(&Address::from_name("alice").id()).balance,
            5
        );
        assert!(state.receipts().is_empty());
    }

    #[test]
    fn test_nonce_must_increment() {
        let db = StateDb::new();
        let mut state = funded_state(&db, "alice", 1_000_000_000);
        let tx = transfer("alice", "bob", 1, 5);
        assert!(matches!(
            execute_tx(&KvRuntime, &mut state, &tx, 1, 1, false),
            Err(ChainError::InvalidTxNonce { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn test_vm_error_absorbed_with_fee_charged() {
        let db = StateDb::new();
        let start = 100 + COINBASE_FEE;
        let mut state = funded_state(&db, "alice", start);

        // deploy a contract, then call its failure hook
        let deploy = Transaction::new(TxBody::new(
            1,
            Address::from_name("alice"),
            Address::empty(),
            0,
            br#"{"Name":"init","Args":[]}"#.to_vec(),
            TxType::Normal,
        ));
        execute_tx(&KvRuntime, &mut state, &deploy, 1, 1, false).unwrap();
        let contract = contract_address(&Address::from_name("alice"), 1);

        let mut state = {
            // refund alice for a clean second tx
            let mut account = state.get_account(&Address::from_name("alice").id());
            account.balance = start;
            state.put_account(Address::from_name("alice").id(), account);
            state
        };
        let call = Transaction::new(TxBody::new(
            2,
            Address::from_name("alice"),
            contract.clone(),
            0,
            br#"{"Name":"fail","Args":["boom"]}"#.to_vec(),
            TxType::Normal,
        ));
        // absorbed: Ok, fee charged, nonce burned, error receipt
        execute_tx(&KvRuntime, &mut state, &call, 2, 1, false).unwrap();
        let alice = state.get_account(&Address::from_name("alice").id());
        assert_eq!(alice.balance, start - COINBASE_FEE);
        assert_eq!(alice.nonce, 2);
        let receipt = state.receipts().last().unwrap();
        assert!(!receipt.is_success());
        assert!(receipt.status.contains("boom"));
    }

    #[test]
    fn test_stake_and_unstake() {
        let db = StateDb::new();
        let start = 50 + 2 * COINBASE_FEE;
        let mut state = funded_state(&db, "alice", start);
        let gov = Address::from_name(GOVERNANCE_ACCOUNT);

        let stake = Transaction::new(TxBody::new(
            1,
            Address::from_name("alice"),
            gov.clone(),
            50,
            br#"{"Name":"stake"}"#.to_vec(),
            TxType::Governance,
        ));
        execute_tx(&KvRuntime, &mut state, &stake, 1, 1, false).unwrap();
        assert_eq!(state.get_account(&gov.id()).balance, 50);

        let unstake = Transaction::new(TxBody::new(
            2,
            Address::from_name("alice"),
            gov.clone(),
            50,
            br#"{"Name":"unstake"}"#.to_vec(),
            TxType::Governance,
        ));
        execute_tx(&KvRuntime, &mut state, &unstake, 2, 1, false).unwrap();
        assert_eq!(state.get_account(&gov.id()).balance, 0);
        assert_eq!(
            state.get_account(&Address::from_name("alice").id()).balance,
            start - 2 * COINBASE_FEE
        );
    }

    #[test]
    fn test_unstake_more_than_staked_fails() {
        let db = StateDb::new();
        let mut state = funded_state(&db, "alice", 100 + COINBASE_FEE);
        let gov = Address::from_name(GOVERNANCE_ACCOUNT);
        let unstake = Transaction::new(TxBody::new(
            1,
            Address::from_name("alice"),
            gov,
            10,
            br#"{"Name":"unstake"}"#.to_vec(),
            TxType::Governance,
        ));
        assert!(matches!(
            execute_tx(&KvRuntime, &mut state, &unstake, 1, 1, false),
            Err(ChainError::Governance(_))
        ));
    }
}
