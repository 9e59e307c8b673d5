//! Chain mutations: estimation, counter assignment and submission
//!
//! All batches in the process go through one `SigningCounterQueue`, so a
//! signer's counters follow submission order and are never skipped or
//! handed out twice.

mod chain;
mod counter;
mod dispatcher;
mod operation;

pub use chain::{ChainClient, ChainError, CounterSource};
pub use counter::{CounterState, Settlement, SignerPhase, SigningCounterQueue};
pub use dispatcher::{DryRunOutcome, OperationDispatcher, SendOutcome};
pub use operation::{
    apply_overrides, estimate_for, map_estimates, Estimate, FeeOverrides, OperationBatch,
    OperationParams,
};

pub(crate) fn serialize_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&alloy::hex::encode(bytes))
}
