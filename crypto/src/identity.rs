//! Key-backed validator identity

use xshard_core::ValidatorIdentity;

use crate::hashing::hash_multiple;
use crate::keys::{did_from_public_key, KeyPair, PublicKey};
use crate::signing::{is_valid_signature, sign};

const CHALLENGE_DOMAIN: &[u8] = b"XSHARD_IDENTITY:";

/// Validator identity whose DID is derived from an ed25519 key
#[derive(Clone, Debug)]
pub struct KeyIdentity {
    keypair: KeyPair,
    did: String,
}

impl KeyIdentity {
    pub fn new(keypair: KeyPair) -> Self {
        let did = keypair.did();
        Self { keypair, did }
    }

    pub fn generate() -> Self {
        Self::new(KeyPair::generate())
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Identity claiming a DID it does not own; `verify` fails
    pub fn impersonating(keypair: KeyPair, did: impl Into<String>) -> Self {
        Self {
            keypair,
            did: did.into(),
        }
    }

    fn challenge(&self) -> Vec<u8> {
        hash_multiple(&[CHALLENGE_DOMAIN, self.did.as_bytes()])
            .as_bytes()
            .to_vec()
    }
}

impl ValidatorIdentity for KeyIdentity {
    fn did(&self) -> String {
        self.did.clone()
    }

    /// The DID must be derived from our key and the key must sign a
    /// DID-bound challenge that verifies against it
    fn verify(&self) -> bool {
        let public_key = self.keypair.public_key();
        if did_from_public_key(&public_key) != self.did {
            return false;
        }
        let challenge = self.challenge();
        let signature = sign(&self.keypair, &challenge);
        is_valid_signature(&public_key, &challenge, &signature)
    }
}
