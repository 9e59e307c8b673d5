//! SLIP-0010 ed25519 child key derivation (hardened only)

use crate::derivation::path::{HdPath, HARDENED_OFFSET};
use crate::error::DerivationError;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Derive the 32-byte ed25519 private seed at `path`
pub fn derive_ed25519(seed: &[u8], path: &HdPath) -> Result<Zeroizing<[u8; 32]>, DerivationError> {
    if !path.all_hardened() {
        return Err(DerivationError::InvalidDerivationPath(format!(
            "{path}: ed25519 derivation only supports hardened indices"
        )));
    }

    let (mut key, mut chain_code) = split(hmac(b"ed25519 seed", &[seed])?);
    for &index in path.indices() {
        debug_assert!(index & HARDENED_OFFSET != 0);
        let (k, c) = split(hmac(
            &chain_code[..],
            &[&[0x00][..], &key[..], &index.to_be_bytes()[..]],
        )?);
        key = k;
        chain_code = c;
    }
    Ok(key)
}

fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<[u8; 64]>, DerivationError> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .map_err(|e| DerivationError::InvalidDerivationPath(format!("HMAC init failed: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn split(output: Zeroizing<[u8; 64]>) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&output[..32]);
    chain_code.copy_from_slice(&output[32..]);
    (key, chain_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::hex;

    // SLIP-0010 test vector 1 for ed25519
    const SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn slip10_vector_master_child() {
        let seed = hex::decode(SEED).unwrap();
        let key = derive_ed25519(&seed, &"m/0'".parse().unwrap()).unwrap();
        assert_eq!(
            hex::encode(&key[..]),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    #[test]
    fn slip10_vector_deep_path() {
        let seed = hex::decode(SEED).unwrap();
        let key = derive_ed25519(&seed, &"m/0'/1'/2'/2'/1000000000'".parse().unwrap()).unwrap();
        assert_eq!(
            hex::encode(&key[..]),
            "8f94d394a8e8fd6b1bc2f3f49f5c47e385281d5c17e65324b0f62483e37e8793"
        );
    }

    #[test]
    fn rejects_unhardened_segments() {
        let err = derive_ed25519(&[0u8; 64], &"m/44'/1729'/0'/0".parse().unwrap()).unwrap_err();
        assert!(matches!(err, DerivationError::InvalidDerivationPath(_)));
    }
}
