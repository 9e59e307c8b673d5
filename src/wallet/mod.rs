//! Operation signing
//!
//! Private keys are decrypted out of the keyring straight into a
//! `SecureSigner` and never leave it. Estimation uses `DryRunSigner`, which
//! shares the `OperationSigner` interface but holds no key at all.

mod dry_run;
mod signer;

pub use dry_run::DryRunSigner;
pub use signer::{signing_digest, OperationSigner, SecureSigner, SignedBytes};
