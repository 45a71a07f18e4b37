mod block_state;

pub use block_state::{BlockState, StateSnapshot};

use crate::core::error::ChainError;
use log::{debug, trace};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use stele_common::{
    account::Account,
    block::BlockNo,
    crypto::{hash, AccountId, Hash},
    serializer::{Serializer, Writer},
};

// One committed version of the world state: accounts plus per-contract
// storage and code. Versions are immutable once committed; a block
// builds the next version through a BlockState overlay.
#[derive(Clone, Debug, Default)]
pub struct StateVersion {
    pub(crate) accounts: BTreeMap<AccountId, Account>,
    pub(crate) storage: BTreeMap<AccountId, BTreeMap<Vec<u8>, Vec<u8>>>,
    pub(crate) code: BTreeMap<AccountId, Vec<u8>>,
}

impl StateVersion {
    pub fn empty() -> Self {
        Self::default()
    }

    // Deterministic digest over the sorted account map. Contract
    // storage and code are committed through each account's
    // storage_root / code_hash, kept current on every merge.
    pub fn root(&self) -> Hash {
        let mut writer = Writer::new();
        writer.write_u32(self.accounts.len() as u32);
        for (id, account) in &self.accounts {
            id.write(&mut writer);
            account.write(&mut writer);
        }
        hash(writer.as_bytes())
    }
}

// Versioned state database with snapshot/rollback/commit semantics.
// Committed versions stay addressable by root so a reorganization can
// move the head back to any fork point.
pub struct StateDb {
    versions: HashMap<Hash, Arc<StateVersion>>,
    current_root: Hash,
    // block_no -> state root before that block was applied, written
    // ahead of each block so contract stores roll forward after crash
    recovery_points: BTreeMap<BlockNo, Hash>,
}

impl StateDb {
    pub fn new() -> Self {
        let version = StateVersion::empty();
        let root = version.root();
        let mut versions = HashMap::new();
        versions.insert(root.clone(), Arc::new(version));
        StateDb {
            versions,
            current_root: root,
            recovery_points: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Hash {
        &self.current_root
    }

    pub fn version(&self, root: &Hash) -> Result<Arc<StateVersion>, ChainError> {
        self.versions
            .get(root)
            .cloned()
            .ok_or_else(|| ChainError::UnknownStateRoot(root.clone()))
    }

    // Mutation buffer rooted at the current head
    pub fn block_state(&self) -> BlockState {
        // current root is always a known version
        let base = self.versions[&self.current_root].clone();
        BlockState::new(base, self.current_root.clone())
    }

    pub fn block_state_at(&self, root: &Hash) -> Result<BlockState, ChainError> {
        Ok(BlockState::new(self.version(root)?, root.clone()))
    }

    // Persist the version built by BlockState::update. The head only
    // moves on update_root.
    pub fn commit(&mut self, state: &BlockState) -> Result<Hash, ChainError> {
        let (root, version) = state.built()?;
        trace!("committing state version {}", root);
        self.versions.insert(root.clone(), version);
        Ok(root)
    }

    pub fn update_root(&mut self, state: &BlockState) -> Result<(), ChainError> {
        let (root, _) = state.built()?;
        debug!("state head moves {} -> {}", self.current_root, root);
        self.current_root = root;
        Ok(())
    }

    pub fn rollback_to(&mut self, root: &Hash) -> Result<(), ChainError> {
        if !self.versions.contains_key(root) {
            return Err(ChainError::UnknownStateRoot(root.clone()));
        }
        debug!("state head rolls back {} -> {}", self.current_root, root);
        self.current_root = root.clone();
        Ok(())
    }

    pub fn save_recovery_point(&mut self, block_no: BlockNo, root: &Hash) {
        trace!("recovery point for block {}: {}", block_no, root);
        self.recovery_points.insert(block_no, root.clone());
    }

    pub fn recovery_point(&self, block_no: BlockNo) -> Option<&Hash> {
        self.recovery_points.get(&block_no)
    }
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_common::crypto::Address;

    fn id(name: &str) -> AccountId {
        Address::from_name(name).id()
    }

    #[test]
    fn test_commit_and_rollback() {
        let mut db = StateDb::new();
        let genesis_root = db.root().clone();

        let mut state = db.block_state();
        state.put_account(id("alice"), Account::new(100));
        let root = state.update(1).unwrap();
        db.commit(&state).unwrap();
        db.update_root(&state).unwrap();
        assert_eq!(db.root(), &root);
        assert_ne!(db.root(), &genesis_root);

        db.rollback_to(&genesis_root).unwrap();
        assert_eq!(db.root(), &genesis_root);
        // rolling forward again is possible, the version is retained
        db.rollback_to(&root).unwrap();
        assert_eq!(db.root(), &root);
    }

    #[test]
    fn test_same_content_same_root() {
        let mut db_a = StateDb::new();
        let mut db_b = StateDb::new();
        for db in [&mut db_a, &mut db_b] {
            let mut state = db.block_state();
            state.put_account(id("alice"), Account::new(70));
            state.put_account(id("bob"), Account::new(30));
            state.update(1).unwrap();
            db.commit(&state).unwrap();
            db.update_root(&state).unwrap();
        }
        assert_eq!(db_a.root(), db_b.root());
    }

    #[test]
    fn test_unknown_root_rejected() {
        let mut db = StateDb::new();
        assert!(matches!(
            db.rollback_to(&Hash::max()),
            Err(ChainError::UnknownStateRoot(_))
        ));
        assert!(db.block_state_at(&Hash::max()).is_err());
    }
}
