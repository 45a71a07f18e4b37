use crate::{
    crypto::Hash,
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

pub type Nonce = u64;

// Versioned account state. `storage_root` commits the contract
// key-value storage, `code_hash` is zero for plain accounts.
// `sql_recovery_point` is the last block number at which the account's
// contract storage was checkpointed, so the contract DB can be rolled
// forward deterministically after a crash.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Account {
    pub nonce: Nonce,
    pub balance: u64,
    pub code_hash: Option<Hash>,
    pub storage_root: Option<Hash>,
    pub sql_recovery_point: u64,
}

impl Account {
    pub fn new(balance: u64) -> Self {
        Account {
            nonce: 0,
            balance,
            code_hash: None,
            storage_root: None,
            sql_recovery_point: 0,
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code_hash.is_some()
    }

    pub fn add_balance(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
    }

    // Callers must have verified the balance covers the amount
    pub fn sub_balance(&mut self, amount: u64) {
        debug_assert!(self.balance >= amount);
        self.balance = self.balance.saturating_sub(amount);
    }
}

impl Serializer for Account {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.nonce);
        writer.write_u64(self.balance);
        self.code_hash.write(writer);
        self.storage_root.write(writer);
        writer.write_u64(self.sql_recovery_point);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Account {
            nonce: reader.read_u64()?,
            balance: reader.read_u64()?,
            code_hash: Option::read(reader)?,
            storage_root: Option::read(reader)?,
            sql_recovery_point: reader.read_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_roundtrip() {
        let mut account = Account::new(500);
        account.nonce = 3;
        account.sql_recovery_point = 12;
        let decoded = Account::from_bytes(&account.to_bytes()).unwrap();
        assert_eq!(account, decoded);
    }
}
