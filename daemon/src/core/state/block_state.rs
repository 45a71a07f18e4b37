use crate::core::error::ChainError;
use log::trace;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use stele_common::{
    account::Account,
    block::BlockNo,
    crypto::{hash, AccountId, Hash},
    receipt::{receipts_root, Receipt},
    serializer::Writer,
};

use super::StateVersion;

// Point-in-time copy of the mutable buffers, used to roll a failing
// transaction back without touching earlier ones
pub struct StateSnapshot {
    accounts: HashMap<AccountId, Account>,
    storage: HashMap<AccountId, BTreeMap<Vec<u8>, Vec<u8>>>,
    code: HashMap<AccountId, Vec<u8>>,
    receipts_len: usize,
    bp_reward: u64,
}

// In-memory mutation buffer over one committed state version for the
// duration of a single block: commit-or-discard. Collects the ordered
// receipts and the producer reward along the way.
pub struct BlockState {
    base: Arc<StateVersion>,
    base_root: Hash,
    accounts: HashMap<AccountId, Account>,
    storage: HashMap<AccountId, BTreeMap<Vec<u8>, Vec<u8>>>,
    code: HashMap<AccountId, Vec<u8>>,
    receipts: Vec<Receipt>,
    bp_reward: u64,
    built: Option<(Hash, Arc<StateVersion>)>,
}

impl BlockState {
    pub(super) fn new(base: Arc<StateVersion>, base_root: Hash) -> Self {
        BlockState {
            base,
            base_root,
            accounts: HashMap::new(),
            storage: HashMap::new(),
            code: HashMap::new(),
            receipts: Vec::new(),
            bp_reward: 0,
            built: None,
        }
    }

    pub fn base_root(&self) -> &Hash {
        &self.base_root
    }

    pub fn account_exists(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id) || self.base.accounts.contains_key(id)
    }

    // Missing accounts read as the default (zero) account
    pub fn get_account(&self, id: &AccountId) -> Account {
        if let Some(account) = self.accounts.get(id) {
            return account.clone();
        }
        self.base.accounts.get(id).cloned().unwrap_or_default()
    }

    pub fn put_account(&mut self, id: AccountId, account: Account) {
        self.built = None;
        self.accounts.insert(id, account);
    }

    pub fn get_storage(&self, id: &AccountId, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(contract) = self.storage.get(id) {
            if let Some(value) = contract.get(key) {
                return Some(value.clone());
            }
        }
        self.base
            .storage
            .get(id)
            .and_then(|contract| contract.get(key))
            .cloned()
    }

    pub fn set_storage(&mut self, id: &AccountId, key: Vec<u8>, value: Vec<u8>) {
        self.built = None;
        self.storage
            .entry(id.clone())
            .or_default()
            .insert(key, value);
    }

    pub fn get_code(&self, id: &AccountId) -> Option<Vec<u8>> {
        self.code
            .get(id)
            .cloned()
            .or_else(|| self.base.code.get(id).cloned())
    }

    pub fn set_code(&mut self, id: &AccountId, code: Vec<u8>) {
        self.built = None;
        self.code.insert(id.clone(), code);
    }

    pub fn add_receipt(&mut self, receipt: Receipt) {
        trace!("receipt #{}: {}", self.receipts.len(), receipt);
        self.receipts.push(receipt);
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn receipts_root(&self) -> Hash {
        receipts_root(&self.receipts)
    }

    // Fee accumulator credited to the coinbase account at block end
    pub fn add_reward(&mut self, fee: u64) {
        self.bp_reward = self.bp_reward.saturating_add(fee);
    }

    pub fn bp_reward(&self) -> u64 {
        self.bp_reward
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            accounts: self.accounts.clone(),
            storage: self.storage.clone(),
            code: self.code.clone(),
            receipts_len: self.receipts.len(),
            bp_reward: self.bp_reward,
        }
    }

    pub fn rollback(&mut self, snapshot: StateSnapshot) {
        self.built = None;
        self.accounts = snapshot.accounts;
        self.storage = snapshot.storage;
        self.code = snapshot.code;
        self.receipts.truncate(snapshot.receipts_len);
        self.bp_reward = snapshot.bp_reward;
    }

    // Stamp the recovery point on every contract whose storage or
    // code was touched in this block
    pub fn save_recovery_point(&mut self, block_no: BlockNo) {
        let touched: Vec<AccountId> = self
            .storage
            .keys()
            .chain(self.code.keys())
            .cloned()
            .collect();
        for id in touched {
            let mut account = self.get_account(&id);
            account.sql_recovery_point = block_no;
            self.accounts.insert(id, account);
        }
    }

    // Merge the overlays into a fresh version and compute its root.
    // Contract storage roots and code hashes are recomputed for every
    // touched contract before the account map is digested.
    pub fn update(&mut self, _block_no: BlockNo) -> Result<Hash, ChainError> {
        let mut version = (*self.base).clone();

        for (id, code) in &self.code {
            version.code.insert(id.clone(), code.clone());
        }
        for (id, overlay) in &self.storage {
            let contract = version.storage.entry(id.clone()).or_default();
            for (key, value) in overlay {
                contract.insert(key.clone(), value.clone());
            }
        }
        for (id, account) in &self.accounts {
            version.accounts.insert(id.clone(), account.clone());
        }

        // refresh commitments of touched contracts
        let touched: Vec<AccountId> = self
            .storage
            .keys()
            .chain(self.code.keys())
            .cloned()
            .collect();
        for id in touched {
            let mut account = version.accounts.get(&id).cloned().unwrap_or_default();
            if let Some(contract) = version.storage.get(&id) {
                account.storage_root = Some(storage_root(contract));
            }
            if let Some(code) = version.code.get(&id) {
                account.code_hash = Some(hash(code));
            }
            version.accounts.insert(id, account);
        }

        let root = version.root();
        self.built = Some((root.clone(), Arc::new(version)));
        Ok(root)
    }

    pub fn root(&self) -> Result<&Hash, ChainError> {
        self.built
            .as_ref()
            .map(|(root, _)| root)
            .ok_or_else(|| ChainError::UnknownStateRoot(Hash::zero()))
    }

    pub(super) fn built(&self) -> Result<(Hash, Arc<StateVersion>), ChainError> {
        self.built
            .clone()
            .ok_or_else(|| ChainError::UnknownStateRoot(Hash::zero()))
    }
}

fn storage_root(contract: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash {
    let mut writer = Writer::new();
    writer.write_u32(contract.len() as u32);
    for (key, value) in contract {
        writer.write_var_bytes(key);
        writer.write_var_bytes(value);
    }
    hash(writer.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StateDb;
    use stele_common::crypto::Address;

    fn id(name: &str) -> AccountId {
        Address::from_name(name).id()
    }

    #[test]
    fn test_snapshot_rollback_restores_everything() {
        let db = StateDb::new();
        let mut state = db.block_state();
        state.put_account(id("alice"), Account::new(100));
        state.add_receipt(Receipt::success(Address::from_name("alice"), vec![]));
        state.add_reward(10);

        let snapshot = state.snapshot();
        state.put_account(id("alice"), Account::new(1));
        state.set_storage(&id("c"), b"k".to_vec(), b"v".to_vec());
        state.add_receipt(Receipt::success(Address::from_name("c"), vec![]));
        state.add_reward(10);

        state.rollback(snapshot);
        assert_eq!(state.get_account(&id("alice")).balance, 100);
        assert_eq!(state.get_storage(&id("c"), b"k"), None);
        assert_eq!(state.receipts().len(), 1);
        assert_eq!(state.bp_reward(), 10);
    }

    #[test]
    fn test_update_commits_contract_roots() {
        let db = StateDb::new();
        let mut state = db.block_state();
        let contract = id("contract");
        state.set_code(&contract, b"code".to_vec());
        state.set_storage(&contract, b"k".to_vec(), b"v".to_vec());
        state.save_recovery_point(4);
        state.update(4).unwrap();

        let (_, version) = state.built().unwrap();
        let account = version.accounts.get(&contract).unwrap();
        assert!(account.code_hash.is_some());
        assert!(account.storage_root.is_some());
        assert_eq!(account.sql_recovery_point, 4);
    }

    #[test]
    fn test_storage_read_through_base() {
        let mut db = StateDb::new();
        let contract = id("contract");
        let mut state = db.block_state();
        state.set_storage(&contract, b"k".to_vec(), b"v".to_vec());
        state.update(1).unwrap();
        db.commit(&state).unwrap();
        db.update_root(&state).unwrap();

        let next = db.block_state();
        assert_eq!(next.get_storage(&contract, b"k"), Some(b"v".to_vec()));
    }
}
