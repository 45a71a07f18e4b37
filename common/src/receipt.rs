use crate::{
    config::{RECEIPT_STATUS_CREATED, RECEIPT_STATUS_SUCCESS},
    crypto::{Address, Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};

// Outcome of one executed transaction. Receipts are ordered exactly as
// the transactions of their block, VM failures are recorded with the
// error string as status instead of failing the block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub contract_address: Address,
    pub status: String,
    pub result: Vec<u8>,
}

impl Receipt {
    pub fn success(contract_address: Address, result: Vec<u8>) -> Self {
        Receipt {
            contract_address,
            status: RECEIPT_STATUS_SUCCESS.to_string(),
            result,
        }
    }

    pub fn created(contract_address: Address, result: Vec<u8>) -> Self {
        Receipt {
            contract_address,
            status: RECEIPT_STATUS_CREATED.to_string(),
            result,
        }
    }

    pub fn vm_error(contract_address: Address, error: String) -> Self {
        Receipt {
            contract_address,
            status: error,
            result: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RECEIPT_STATUS_SUCCESS || self.status == RECEIPT_STATUS_CREATED
    }
}

impl Serializer for Receipt {
    fn write(&self, writer: &mut Writer) {
        self.contract_address.write(writer);
        writer.write_string(&self.status);
        writer.write_var_bytes(&self.result);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Receipt {
            contract_address: Address::read(reader)?,
            status: reader.read_string()?,
            result: reader.read_var_bytes()?,
        })
    }
}

impl Hashable for Receipt {}

impl Display for Receipt {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "Receipt[contract: {}, status: {}, result: {} bytes]",
            self.contract_address,
            self.status,
            self.result.len()
        )
    }
}

// Deterministic digest over an ordered receipt list, validated against
// re-execution results after a block is applied
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    let mut writer = Writer::new();
    writer.write_u32(receipts.len() as u32);
    for receipt in receipts {
        writer.write_hash(&receipt.hash());
    }
    crate::crypto::hash(writer.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_roundtrip() {
        let receipt = Receipt::success(Address::from_name("contract"), b"ok".to_vec());
        let decoded = Receipt::from_bytes(&receipt.to_bytes()).unwrap();
        assert_eq!(receipt, decoded);
        assert!(decoded.is_success());
    }

    #[test]
    fn test_receipts_root_order_sensitive() {
        let a = Receipt::success(Address::from_name("a"), vec![]);
        let b = Receipt::created(Address::from_name("b"), vec![]);
        assert_ne!(
            receipts_root(&[a.clone(), b.clone()]),
            receipts_root(&[b, a])
        );
    }
}
