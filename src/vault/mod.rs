//! Encrypted secret storage and the wallet keyring built on it

mod keyring;
pub mod record;
mod secret_vault;
mod storage;

pub use keyring::{Account, AccountOrigin, Keyring};
pub use record::{EncryptedPayload, EncryptedRecord, KdfParams, PassKey};
pub use secret_vault::SecretVault;
pub use storage::{JsonFileStorage, MemoryStorage, SecretStorage};
