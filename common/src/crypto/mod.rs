mod address;
mod hash;
mod keys;

pub use address::{Address, AccountId, ACCOUNT_ID_SIZE, ACCOUNT_ID_PREFIX};
pub use hash::{hash, Hash, Hashable, HASH_SIZE};
pub use keys::{verify_signature, KeyPair, Signature, SIGNATURE_SIZE};
