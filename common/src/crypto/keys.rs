use crate::crypto::Address;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

pub const SIGNATURE_SIZE: usize = 64;

pub type Signature = Vec<u8>;

// Ed25519 key pair. The verifying key bytes are the account address.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        KeyPair {
            signing: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair {
            signing: SigningKey::from_bytes(seed),
        }
    }

    // Deterministic key derivation for tooling and tests
    pub fn from_name(name: &str) -> Self {
        let seed: [u8; 32] = Sha256::digest(name.as_bytes()).into();
        Self::from_seed(&seed)
    }

    pub fn address(&self) -> Address {
        Address::new(self.signing.verifying_key().to_bytes().to_vec())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

// Verify an ed25519 signature against an address holding the
// verifying key bytes. Non-key addresses never verify.
pub fn verify_signature(address: &Address, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(address.as_bytes()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    key.verify(message, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::from_name("alice");
        let sig = pair.sign(b"payload");
        assert!(verify_signature(&pair.address(), b"payload", &sig));
        assert!(!verify_signature(&pair.address(), b"other", &sig));
    }

    #[test]
    fn test_name_address_never_verifies() {
        let addr = Address::from_name("alice");
        assert!(!verify_signature(&addr, b"payload", &[0u8; SIGNATURE_SIZE]));
    }
}
