use crate::{
    block::{compute_txs_root, Block, BlockHeader},
    crypto::{Address, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Genesis bundle: the chain's first block parameters plus the initial
// balance allocation. Loaded from JSON, persisted verbatim in the meta
// tree so every restart agrees on block zero.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    pub chain_id: String,
    pub timestamp: i64,
    // address (name or hex public key) -> initial balance
    #[serde(default)]
    pub balances: BTreeMap<String, u64>,
}

impl Genesis {
    pub fn dev(chain_id: &str, timestamp: i64) -> Self {
        Genesis {
            chain_id: chain_id.to_string(),
            timestamp,
            balances: BTreeMap::new(),
        }
    }

    pub fn with_balance(mut self, address: &str, balance: u64) -> Self {
        self.balances.insert(address.to_string(), balance);
        self
    }

    pub fn accounts(&self) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.balances.iter().map(|(name, balance)| {
            // 64 hex chars decode to a raw 32-byte key, anything else
            // is a readable dev name
            let address = if name.len() == 64 {
                hex::decode(name).map(Address::new).unwrap_or_else(|_| {
                    log::warn!("genesis account {} is not hex, treating as name", name);
                    Address::from_name(name)
                })
            } else {
                Address::from_name(name)
            };
            (address, *balance)
        })
    }

    // Build block zero. The state root is supplied by the caller once
    // the initial balances have been committed.
    pub fn to_block(&self, state_root: Hash) -> Block {
        let header = BlockHeader::new(
            0,
            Hash::zero(),
            state_root,
            compute_txs_root(&[]),
            Hash::zero(),
            self.timestamp,
            Address::empty(),
        );
        Block::new(header, Vec::new())
    }
}

impl Serializer for Genesis {
    fn write(&self, writer: &mut Writer) {
        let json = serde_json::to_vec(self).expect("genesis is always serializable");
        writer.write_u32(json.len() as u32);
        writer.write_bytes(&json);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_u32()? as usize;
        let bytes = reader.read_bytes_ref(len)?;
        serde_json::from_slice(bytes).map_err(|_| ReaderError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_roundtrip() {
        let genesis = Genesis::dev("unittest", 1700000000)
            .with_balance("alice", 100)
            .with_balance("bob", 0);
        let decoded = Genesis::from_bytes(&genesis.to_bytes()).unwrap();
        assert_eq!(genesis, decoded);
        assert_eq!(decoded.accounts().count(), 2);
    }

    #[test]
    fn test_genesis_block_is_block_zero() {
        let genesis = Genesis::dev("unittest", 1);
        let block = genesis.to_block(Hash::zero());
        assert!(block.is_genesis());
        assert_eq!(block.prev_hash, Hash::zero());
    }
}
