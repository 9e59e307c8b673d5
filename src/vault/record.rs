//! Encrypted record format and the password-based cipher behind it
//!
//! Each record gets its own random salt, so the AES-256-GCM key protecting it
//! is unique even when the same password protects every record.

use crate::error::VaultError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use alloy::hex;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Argon2id parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Time cost (iterations)
    pub t_cost: u32,
    /// Parallelism
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts, for tests only
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// AES-GCM output as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: String,
    pub ciphertext: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
}

/// One persisted secret: `{ salt, encrypted: { iv, ciphertext, authTag }, kdf }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub salt: String,
    pub encrypted: EncryptedPayload,
    /// Argon2id parameters the record was sealed with; records without
    /// them are opened with the caller's parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
}

/// Password material held while the wallet is unlocked
///
/// The password itself never leaves this type; record keys are derived from
/// it on demand and zeroized after use.
#[derive(Clone)]
pub struct PassKey {
    password: SecretString,
    params: KdfParams,
}

impl PassKey {
    pub fn new(password: SecretString, params: KdfParams) -> Self {
        Self { password, params }
    }

    pub fn from_password(password: &str, params: KdfParams) -> Self {
        Self::new(SecretString::from(password.to_string()), params)
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive the per-record key for `salt`
    fn record_key(&self, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
        let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(KEY_LEN))
        .map_err(|e| VaultError::Storage(format!("invalid KDF parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(
                self.password.expose_secret().as_bytes(),
                salt,
                key.as_mut(),
            )
            .map_err(|e| VaultError::Storage(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }
}

impl std::fmt::Debug for PassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassKey")
            .field("password", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}

/// Encrypt `plaintext` under a fresh salt and IV
pub fn seal(plaintext: &[u8], pass_key: &PassKey) -> Result<EncryptedRecord, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let key = pass_key.record_key(&salt, pass_key.params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| VaultError::Storage(format!("cipher init failed: {}", e)))?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| VaultError::Storage("encryption failed".to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(EncryptedRecord {
        salt: hex::encode(salt),
        encrypted: EncryptedPayload {
            iv: hex::encode(iv),
            ciphertext: hex::encode(&sealed),
            auth_tag: hex::encode(tag),
        },
        kdf: Some(pass_key.params),
    })
}

/// Decrypt and authenticate a record
///
/// Any malformed field or tag mismatch is `DecryptionFailed`; no partial
/// plaintext is ever returned.
pub fn open(record: &EncryptedRecord, pass_key: &PassKey) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let salt = hex::decode(&record.salt).map_err(|_| VaultError::DecryptionFailed)?;
    let iv = hex::decode(&record.encrypted.iv).map_err(|_| VaultError::DecryptionFailed)?;
    let mut sealed =
        hex::decode(&record.encrypted.ciphertext).map_err(|_| VaultError::DecryptionFailed)?;
    let tag = hex::decode(&record.encrypted.auth_tag).map_err(|_| VaultError::DecryptionFailed)?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }
    sealed.extend_from_slice(&tag);

    let key = pass_key.record_key(&salt, record.kdf.unwrap_or(pass_key.params))?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| VaultError::Storage(format!("cipher init failed: {}", e)))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|_| VaultError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}
