use crate::{
    crypto::{hash, verify_signature, Address, Hash, Hashable, KeyPair},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};
use thiserror::Error;

// Hard cap on payload bytes carried by one transaction (contract code
// or call arguments)
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxValidationError {
    #[error("sender and receiever cannot be same")]
    SameSenderReceiver,
    #[error("tx hash is not consistent with its body")]
    InvalidHash,
    #[error("tx signature verification failed")]
    InvalidSignature,
    #[error("tx has no sender account")]
    MissingSender,
    #[error("tx payload is over {MAX_PAYLOAD_SIZE} bytes")]
    PayloadTooLarge,
}

// this enum represents all types of transaction available on the chain
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Normal,
    Governance,
}

impl Serializer for TxType {
    fn write(&self, writer: &mut Writer) {
        let v = match self {
            TxType::Normal => 0u8,
            TxType::Governance => 1u8,
        };
        writer.write_u8(v);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(TxType::Normal),
            1 => Ok(TxType::Governance),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn size(&self) -> usize {
        1
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TxBody {
    // nonce must be exactly one above the sender's account nonce
    pub nonce: u64,
    // Source of the transaction
    pub account: Address,
    // Empty recipient deploys the payload as a new contract
    pub recipient: Address,
    pub amount: u64,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    pub tx_type: TxType,
    // ed25519 signature of the body with this field empty
    #[serde(with = "hex")]
    pub sign: Vec<u8>,
}

impl TxBody {
    pub fn new(
        nonce: u64,
        account: Address,
        recipient: Address,
        amount: u64,
        payload: Vec<u8>,
        tx_type: TxType,
    ) -> Self {
        TxBody {
            nonce,
            account,
            recipient,
            amount,
            payload,
            tx_type,
            sign: Vec::new(),
        }
    }

    // The signed message is the body serialized with an empty signature
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.sign = Vec::new();
        unsigned.to_bytes()
    }

    pub fn sign(&mut self, key: &KeyPair) {
        self.sign = key.sign(&self.signing_payload());
    }
}

impl Serializer for TxBody {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.nonce);
        self.account.write(writer);
        self.recipient.write(writer);
        writer.write_u64(self.amount);
        writer.write_u32(self.payload.len() as u32);
        writer.write_bytes(&self.payload);
        self.tx_type.write(writer);
        writer.write_var_bytes(&self.sign);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let nonce = reader.read_u64()?;
        let account = Address::read(reader)?;
        let recipient = Address::read(reader)?;
        let amount = reader.read_u64()?;
        let payload_len = reader.read_u32()? as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ReaderError::InvalidSize);
        }
        let payload = reader.read_bytes(payload_len)?;
        let tx_type = TxType::read(reader)?;
        let sign = reader.read_var_bytes()?;
        Ok(TxBody {
            nonce,
            account,
            recipient,
            amount,
            payload,
            tx_type,
            sign,
        })
    }
}

impl Hashable for TxBody {}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Transaction {
    hash: Hash,
    #[serde(flatten)]
    body: TxBody,
}

impl Transaction {
    pub fn new(body: TxBody) -> Self {
        let hash = body.hash();
        Transaction { hash, body }
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn nonce(&self) -> u64 {
        self.body.nonce
    }

    pub fn sender(&self) -> &Address {
        &self.body.account
    }

    pub fn recipient(&self) -> &Address {
        &self.body.recipient
    }

    pub fn amount(&self) -> u64 {
        self.body.amount
    }

    pub fn payload(&self) -> &[u8] {
        &self.body.payload
    }

    pub fn tx_type(&self) -> TxType {
        self.body.tx_type
    }

    // Structural self-consistency, independent of any chain state.
    // Signature verification is gated by the caller: dev harness
    // addresses are not verifying keys.
    pub fn validate(&self, verify_sig: bool) -> Result<(), TxValidationError> {
        if self.body.account.is_empty() {
            return Err(TxValidationError::MissingSender);
        }
        if !self.body.recipient.is_empty() && self.body.account == self.body.recipient {
            return Err(TxValidationError::SameSenderReceiver);
        }
        if self.body.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TxValidationError::PayloadTooLarge);
        }
        if self.hash != self.body.hash() {
            return Err(TxValidationError::InvalidHash);
        }
        if verify_sig
            && !verify_signature(&self.body.account, &self.body.signing_payload(), &self.body.sign)
        {
            return Err(TxValidationError::InvalidSignature);
        }
        Ok(())
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.body.write(writer);
    }

    // The hash is recomputed on read so a decoded transaction is
    // always self-consistent
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Transaction::new(TxBody::read(reader)?))
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        self.hash.clone()
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "Tx[hash: {}, nonce: {}, from: {}, to: {}, amount: {}, type: {:?}]",
            self.hash,
            self.body.nonce,
            self.body.account,
            self.body.recipient,
            self.body.amount,
            self.body.tx_type
        )
    }
}

// Synthesized address for a contract deployed by `sender` at `nonce`
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut writer = Writer::new();
    writer.write_bytes(sender.as_bytes());
    writer.write_u64(nonce);
    Address::new(hash(writer.as_bytes()).to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: &str, to: &str, amount: u64) -> Transaction {
        Transaction::new(TxBody::new(
            1,
            Address::from_name(from),
            Address::from_name(to),
            amount,
            Vec::new(),
            TxType::Normal,
        ))
    }

    #[test]
    fn test_self_send_rejected() {
        let tx = transfer("alice", "alice", 1);
        assert_eq!(
            tx.validate(false),
            Err(TxValidationError::SameSenderReceiver)
        );
        assert_eq!(
            tx.validate(false).unwrap_err().to_string(),
            "sender and receiever cannot be same"
        );
    }

    #[test]
    fn test_hash_self_consistent() {
        let tx = transfer("alice", "bob", 3);
        assert!(tx.validate(false).is_ok());
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn test_signature_required_when_enforced() {
        let key = KeyPair::from_name("alice");
        let mut body = TxBody::new(
            1,
            key.address(),
            Address::from_name("bob"),
            10,
            Vec::new(),
            TxType::Normal,
        );
        // unsigned fails, signed passes
        assert_eq!(
            Transaction::new(body.clone()).validate(true),
            Err(TxValidationError::InvalidSignature)
        );
        body.sign(&key);
        assert!(Transaction::new(body).validate(true).is_ok());
    }

    #[test]
    fn test_contract_address_depends_on_nonce() {
        let sender = Address::from_name("alice");
        assert_ne!(contract_address(&sender, 1), contract_address(&sender, 2));
    }
}
