use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Error, Formatter};

// Account ids are a domain-separated digest of the raw address:
// one prefix byte followed by SHA-256 of the address bytes.
pub const ACCOUNT_ID_PREFIX: u8 = 0x0C;
pub const ACCOUNT_ID_SIZE: usize = 33;

// Raw account address bytes. Production addresses are public keys,
// the dev harness uses plain UTF-8 names. An empty address on a
// transaction recipient means "create a new contract".
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex")] Vec<u8>);

impl Address {
    pub fn new(bytes: Vec<u8>) -> Self {
        Address(bytes)
    }

    pub const fn empty() -> Self {
        Address(Vec::new())
    }

    pub fn from_name(name: &str) -> Self {
        Address(name.as_bytes().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn id(&self) -> AccountId {
        AccountId::of(self)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        // Dev addresses are readable names, show them as such
        if !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "{}", hex::encode(&self.0))
        }
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        writer.write_var_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Address(reader.read_var_bytes()?))
    }

    fn size(&self) -> usize {
        2 + self.0.len()
    }
}

#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct AccountId([u8; ACCOUNT_ID_SIZE]);

impl AccountId {
    pub fn of(address: &Address) -> Self {
        let mut bytes = [0u8; ACCOUNT_ID_SIZE];
        bytes[0] = ACCOUNT_ID_PREFIX;
        bytes[1..].copy_from_slice(&Sha256::digest(address.as_bytes()));
        AccountId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_SIZE] {
        &self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serializer for AccountId {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_ref(ACCOUNT_ID_SIZE)?;
        Ok(AccountId(bytes.try_into().unwrap()))
    }

    fn size(&self) -> usize {
        ACCOUNT_ID_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_prefix() {
        let id = Address::from_name("alice").id();
        assert_eq!(id.as_bytes()[0], ACCOUNT_ID_PREFIX);
    }

    #[test]
    fn test_account_id_deterministic() {
        let a = Address::from_name("alice").id();
        let b = Address::from_name("alice").id();
        let c = Address::from_name("bob").id();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
