//! Secure signer implementation
//!
//! SECURITY: This is the ONLY place where decrypted private keys are used.
//! - Keys are held in the curve libraries' signing key types, which zeroize on drop
//! - Keys are never serialized
//! - Keys are never sent over the gateway
//! - Keys are never logged

use crate::derivation::{
    base58, decode_evm_secret, decode_tezos_secret, private_key_to_account_creds, ChainKind,
};
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::keccak256;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::SigningKey;
use serde::Serialize;

type Blake2b256 = Blake2b<U32>;

/// Bytes together with the signature over them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedBytes {
    /// Exactly the bytes that were handed to the signer
    #[serde(serialize_with = "crate::dispatch::serialize_hex")]
    pub bytes: Vec<u8>,
    /// Chain-encoded signature (`edsig...` or `0x...`)
    pub signature: String,
}

/// Anything that can turn operation bytes into a signature
#[async_trait]
pub trait OperationSigner: Send + Sync {
    fn chain_kind(&self) -> ChainKind;

    /// Public address (safe to expose)
    fn address(&self) -> &str;

    /// Encoded public key (safe to expose)
    fn public_key(&self) -> &str;

    async fn sign(&self, bytes: &[u8]) -> Result<SignedBytes>;
}

enum KeyMaterial {
    Ed25519(SigningKey),
    Secp256k1(PrivateKeySigner),
}

/// Signer that protects its private key
///
/// The private key is:
/// - Stored in the curve library's key type
/// - Never serialized (no Serialize impl)
/// - Only accessible via signing operations
pub struct SecureSigner {
    key: KeyMaterial,
    chain_kind: ChainKind,
    address: String,
    public_key: String,
}

impl SecureSigner {
    /// Create a signer from a chain-encoded private key
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let creds = private_key_to_account_creds(private_key)?;
        let key = match creds.chain_kind {
            ChainKind::Tezos => KeyMaterial::Ed25519(decode_tezos_secret(private_key.trim())?),
            ChainKind::Evm => {
                let secret = decode_evm_secret(private_key.trim())?;
                let signer = PrivateKeySigner::from_slice(&secret[..])
                    .map_err(|e| Error::InvalidArgument(format!("Invalid private key: {}", e)))?;
                KeyMaterial::Secp256k1(signer)
            }
        };

        Ok(Self {
            key,
            chain_kind: creds.chain_kind,
            address: creds.address,
            public_key: creds.public_key,
        })
    }

    /// Sign a 32-byte digest
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<String> {
        match &self.key {
            KeyMaterial::Ed25519(key) => {
                use ed25519_dalek::Signer;
                let signature = key.sign(digest);
                Ok(base58::encode(
                    &base58::prefix::ED25519_SIGNATURE,
                    &signature.to_bytes(),
                ))
            }
            KeyMaterial::Secp256k1(signer) => {
                use alloy::signers::SignerSync;
                let signature = signer
                    .sign_hash_sync(&alloy::primitives::B256::from(*digest))
                    .map_err(|e| Error::InvalidArgument(format!("Signing failed: {}", e)))?;
                Ok(format!("0x{}", hex::encode(signature.as_bytes())))
            }
        }
    }
}

/// Digest a chain signs over: blake2b-256 for the default curve, keccak-256 for EVM
pub fn signing_digest(chain_kind: ChainKind, bytes: &[u8]) -> [u8; 32] {
    match chain_kind {
        ChainKind::Tezos => Blake2b256::digest(bytes).into(),
        ChainKind::Evm => keccak256(bytes).0,
    }
}

#[async_trait]
impl OperationSigner for SecureSigner {
    fn chain_kind(&self) -> ChainKind {
        self.chain_kind
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn sign(&self, bytes: &[u8]) -> Result<SignedBytes> {
        let digest = signing_digest(self.chain_kind, bytes);
        let signature = self.sign_digest(&digest)?;
        tracing::debug!(address = %self.address, len = bytes.len(), "Signed operation bytes");
        Ok(SignedBytes {
            bytes: bytes.to_vec(),
            signature,
        })
    }
}

// Implement Debug manually to avoid exposing the key
impl std::fmt::Debug for SecureSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSigner")
            .field("chain_kind", &self.chain_kind)
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Signature};
    use ed25519_dalek::Verifier;

    // Test private key (DO NOT use in production!)
    const EVM_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn tezos_key() -> String {
        base58::encode(&base58::prefix::ED25519_SEED, &[42u8; 32])
    }

    #[test]
    fn test_signer_from_evm_key() {
        let signer = SecureSigner::from_private_key(EVM_KEY).unwrap();
        assert_eq!(signer.chain_kind(), ChainKind::Evm);
        assert_eq!(
            signer.address().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn evm_signature_recovers_signer() {
        let signer = SecureSigner::from_private_key(EVM_KEY).unwrap();
        let signed = signer.sign(b"operation bytes").await.unwrap();

        let raw = hex::decode(signed.signature.trim_start_matches("0x")).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();
        let digest = keccak256(b"operation bytes");
        let recovered: Address = signature.recover_address_from_prehash(&digest).unwrap();
        assert_eq!(recovered.to_checksum(None), signer.address());
    }

    #[tokio::test]
    async fn ed25519_signature_verifies() {
        let key = tezos_key();
        let signer = SecureSigner::from_private_key(&key).unwrap();
        assert!(signer.address().starts_with("tz1"));

        let signed = signer.sign(b"forged").await.unwrap();
        assert!(signed.signature.starts_with("edsig"));
        assert_eq!(signed.bytes, b"forged".to_vec());

        let raw = base58::decode(&base58::prefix::ED25519_SIGNATURE, &signed.signature, 64).unwrap();
        let signature = ed25519_dalek::Signature::from_slice(&raw).unwrap();
        let verifying = SigningKey::from_bytes(&[42u8; 32]).verifying_key();
        verifying
            .verify(&signing_digest(ChainKind::Tezos, b"forged"), &signature)
            .unwrap();
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = SecureSigner::from_private_key(EVM_KEY).unwrap();
        let debug_str = format!("{:?}", signer);

        assert!(!debug_str.contains("ac0974bec"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
