//! Validator key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;
use xshard_core::{XShardError, XShardResult};

use crate::keys::{KeyPair, SecretKey};

/// Derive a key using HKDF-SHA256
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_length: usize,
) -> XShardResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = vec![0u8; output_length];

    hk.expand(info, &mut output)
        .map_err(|e| XShardError::KeyDerivationFailed(e.to_string()))?;

    Ok(output)
}

/// Derive a 32-byte key
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> XShardResult<[u8; 32]> {
    let key = derive_key(input_key_material, salt, info, 32)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(&key);
    Ok(result)
}

/// Derive a keypair from a seed and path
pub fn derive_keypair(seed: &[u8], path: &str) -> XShardResult<KeyPair> {
    let derived = derive_key_32(seed, None, path.as_bytes())?;
    Ok(SecretKey::new(derived).to_keypair())
}

/// Master seed the validator set of a network is derived from
pub struct MasterKey {
    seed: [u8; 32],
}

impl MasterKey {
    /// Create from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// Generate a random master key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self { seed }
    }

    /// Create from an arbitrary-length hex seed
    pub fn from_hex(seed_hex: &str) -> XShardResult<Self> {
        let bytes = hex::decode(seed_hex)
            .map_err(|e| XShardError::KeyDerivationFailed(e.to_string()))?;
        let seed = derive_key_32(&bytes, Some(b"xshard-seed"), b"master")?;
        Ok(Self { seed })
    }

    /// Keypair of the validator at `index`
    pub fn validator_keypair(&self, index: u32) -> XShardResult<KeyPair> {
        derive_keypair(&self.seed, &format!("xshard/validator/{}", index))
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}
