//! Dry-run signing for estimation
//!
//! SECURITY NOTE:
//! - This signer holds public information only; it never touches a private key
//! - Its signatures are placeholders that no chain will accept

use crate::derivation::{base58, ChainKind};
use crate::wallet::{OperationSigner, SignedBytes};
use crate::Result;
use alloy::hex;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Signer that records the exact bytes it is asked to sign
pub struct DryRunSigner {
    chain_kind: ChainKind,
    address: String,
    public_key: String,
    captured: Mutex<Option<Vec<u8>>>,
}

impl DryRunSigner {
    pub fn new(chain_kind: ChainKind, address: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            chain_kind,
            address: address.into(),
            public_key: public_key.into(),
            captured: Mutex::new(None),
        }
    }

    /// Mirror the public side of another signer
    pub fn for_signer(signer: &dyn OperationSigner) -> Self {
        Self::new(signer.chain_kind(), signer.address(), signer.public_key())
    }

    /// Bytes of the most recent `sign` call
    pub fn captured(&self) -> Option<Vec<u8>> {
        self.captured.lock().clone()
    }

    fn placeholder_signature(&self) -> String {
        match self.chain_kind {
            ChainKind::Tezos => base58::encode(&base58::prefix::ED25519_SIGNATURE, &[0u8; 64]),
            ChainKind::Evm => format!("0x{}", hex::encode([0u8; 65])),
        }
    }
}

#[async_trait]
impl OperationSigner for DryRunSigner {
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
        *self.captured.lock() = Some(bytes.to_vec());
        Ok(SignedBytes {
            bytes: bytes.to_vec(),
            signature: self.placeholder_signature(),
        })
    }
}

impl std::fmt::Debug for DryRunSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DryRunSigner")
            .field("chain_kind", &self.chain_kind)
            .field("address", &self.address)
            .finish()
    }
}
