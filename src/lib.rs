//! Wallet Core
//!
//! Trusted background of a multi-chain wallet:
//! - Encrypts secrets at rest under a password-derived key (Argon2id + AES-256-GCM)
//! - Derives account keys from a mnemonic (ed25519 via SLIP-0010, secp256k1 via BIP32)
//! - Orders operation submissions per signer so counters are never reused
//! - Talks to UI surfaces and pages over a typed, correlated message gateway
//!
//! # Security Model
//!
//! - Pages never reach the background directly; the relay attributes an origin
//!   to every page request and the origin policy decides what it may do
//! - All requests pass through the interceptor pipeline
//! - Private keys never leave the `wallet` module's signers
//! - Signing, broadcasting and secret disclosure need explicit user approval
//! - Audit trail of every request, without payloads

pub mod background;
pub mod config;
pub mod derivation;
pub mod dispatch;
pub mod gateway;
pub mod interceptors;
pub mod vault;
pub mod wallet;

mod error;

// Re-export commonly used types
pub use background::{Background, BackgroundRunner, WalletRequest, WalletResponse};
pub use config::{Config, MNEMONIC_ENV, PASSWORD_ENV, PRIVATE_KEY_ENV};
pub use derivation::ChainKind;
pub use error::{DerivationError, DispatchError, Error, ProtocolError, Result, VaultError};
pub use vault::{Account, Keyring};
