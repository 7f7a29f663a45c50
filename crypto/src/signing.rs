//! Digital signature operations using Ed25519

use ed25519_dalek::{Signer, Verifier};
use xshard_core::{XShardError, XShardResult};

use crate::keys::{public_key_to_ed25519, KeyPair, PublicKey, Signature};

/// Sign a message using Ed25519
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Signature {
    let signature = keypair.signing_key().sign(message);
    Signature(signature.to_bytes())
}

/// Verify a signature using Ed25519
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> XShardResult<()> {
    let verifying_key = public_key_to_ed25519(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify(message, &sig)
        .map_err(|_| XShardError::IdentityVerificationFailed("invalid signature".into()))
}

/// Check if a signature is valid (returns bool instead of Result)
pub fn is_valid_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    verify(public_key, message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"prepare shard 0";

        let signature = sign(&keypair, message);
        assert!(verify(&keypair.public_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_invalid_signature() {
        let keypair1 = KeyPair::generate();
        let keypair2 = KeyPair::generate();
        let message = b"prepare shard 0";

        let signature = sign(&keypair1, message);

        assert!(!is_valid_signature(&keypair2.public_key(), message, &signature));
        assert!(!is_valid_signature(&keypair1.public_key(), b"commit shard 0", &signature));
    }
}
