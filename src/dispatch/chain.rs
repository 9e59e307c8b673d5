//! Chain connectivity as an injected capability

use crate::dispatch::{Estimate, OperationBatch};
use crate::error::DispatchError;
use crate::wallet::SignedBytes;
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a chain node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ChainError(pub String);

impl ChainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ChainError> for DispatchError {
    fn from(err: ChainError) -> Self {
        DispatchError::Chain(err.0)
    }
}

/// Source of the last counter a signer consumed on chain
#[async_trait]
pub trait CounterSource: Send + Sync {
    async fn onchain_counter(&self, address: &str) -> Result<u64, ChainError>;
}

/// Everything the dispatcher needs from a node
#[async_trait]
pub trait ChainClient: CounterSource {
    /// Encode a counter-assigned batch into the bytes to sign
    async fn forge(&self, batch: &OperationBatch) -> Result<Vec<u8>, ChainError>;

    /// Simulate a signed batch; may return one extra leading estimate
    async fn estimate(&self, batch: &OperationBatch, signed: &SignedBytes) -> Result<Vec<Estimate>, ChainError>;

    /// Broadcast a signed batch, returning its operation hash
    async fn inject(&self, signed: &SignedBytes) -> Result<String, ChainError>;

    async fn is_included(&self, op_hash: &str) -> Result<bool, ChainError>;
}
