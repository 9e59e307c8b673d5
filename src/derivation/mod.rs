//! Deterministic key derivation
//!
//! Mnemonic (+ passphrase, + path) → chain-specific private key → public
//! credentials. Everything here is a pure function of its inputs: the same
//! `(mnemonic, password, path)` always yields the same key.
//!
//! Two chain kinds are supported:
//! - `Tezos`, the default curve (ed25519, SLIP-0010 hardened derivation,
//!   base58check `edsk`/`edpk`/`tz1` encodings)
//! - `Evm`, selected by paths under `m/44'/60'` (secp256k1, BIP32,
//!   `0x` hex keys and checksummed addresses)

pub mod base58;
mod path;
mod slip10;

pub use path::{HdPath, HARDENED_OFFSET};

use crate::error::DerivationError;
use alloy::hex;
use alloy::signers::local::PrivateKeySigner;
use bip39::{Language, Mnemonic};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Chain family a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Tezos,
    Evm,
}

impl ChainKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChainKind::Tezos => "tezos",
            ChainKind::Evm => "evm",
        }
    }

    /// HD path of the `index`-th account of this chain
    pub fn account_path(&self, index: u32) -> String {
        match self {
            ChainKind::Tezos => format!("m/44'/1729'/{}'/0'", index),
            ChainKind::Evm => format!("m/44'/60'/0'/0/{}", index),
        }
    }

    /// Detect the chain kind from a private key's text encoding
    pub fn of_private_key(private_key: &str) -> Option<Self> {
        let trimmed = private_key.trim();
        if trimmed.starts_with("edsk") {
            Some(ChainKind::Tezos)
        } else if trimmed.starts_with("0x") || (trimmed.len() == 64 && is_hex(trimmed)) {
            Some(ChainKind::Evm)
        } else {
            None
        }
    }
}

/// Output of `mnemonic_to_private_key`
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub chain_kind: ChainKind,
    pub private_key: SecretString,
}

/// Public credentials plus the (still secret) private key they came from
#[derive(Debug, Clone)]
pub struct AccountCreds {
    pub chain_kind: ChainKind,
    pub address: String,
    pub public_key: String,
    pub private_key: SecretString,
}

/// Generate a fresh English mnemonic with `word_count` words
pub fn generate_mnemonic(word_count: usize) -> Result<SecretString, DerivationError> {
    if !matches!(word_count, 12 | 15 | 18 | 21 | 24) {
        return Err(DerivationError::InvalidMnemonic(format!(
            "unsupported word count {}",
            word_count
        )));
    }
    let mut entropy = Zeroizing::new(vec![0u8; word_count / 3 * 4]);
    OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))?;
    Ok(SecretString::from(mnemonic.to_string()))
}

/// Check a mnemonic without deriving anything
pub fn validate_mnemonic(mnemonic: &str) -> Result<(), DerivationError> {
    parse_mnemonic(mnemonic).map(|_| ())
}

fn parse_mnemonic(mnemonic: &str) -> Result<Mnemonic, DerivationError> {
    Mnemonic::parse_in_normalized(Language::English, mnemonic.trim())
        .map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))
}

/// Derive the private key for `(mnemonic, password, derivation_path)`
pub fn mnemonic_to_private_key(
    mnemonic: &str,
    password: Option<&str>,
    derivation_path: Option<&str>,
) -> Result<DerivedKey, DerivationError> {
    let mnemonic = parse_mnemonic(mnemonic)?;
    let seed = Zeroizing::new(mnemonic.to_seed(password.unwrap_or("")));

    let Some(path) = derivation_path else {
        // No path: the default curve keys straight off the seed
        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(&seed[..32]);
        return Ok(DerivedKey {
            chain_kind: ChainKind::Tezos,
            private_key: encode_tezos_secret(&secret),
        });
    };

    let path: HdPath = path.parse()?;
    if path.is_evm() {
        let secret = derive_secp256k1(&seed[..], &path)?;
        Ok(DerivedKey {
            chain_kind: ChainKind::Evm,
            private_key: SecretString::from(format!("0x{}", hex::encode(&secret[..]))),
        })
    } else {
        let secret = slip10::derive_ed25519(&seed[..], &path)?;
        Ok(DerivedKey {
            chain_kind: ChainKind::Tezos,
            private_key: encode_tezos_secret(&secret),
        })
    }
}

/// Public key and address for a private key in either chain's encoding
pub fn private_key_to_account_creds(private_key: &str) -> Result<AccountCreds, DerivationError> {
    let private_key = private_key.trim();
    match ChainKind::of_private_key(private_key) {
        Some(ChainKind::Tezos) => {
            let signing_key = decode_tezos_secret(private_key)?;
            let public_key = signing_key.verifying_key().to_bytes();
            Ok(AccountCreds {
                chain_kind: ChainKind::Tezos,
                address: base58::public_key_hash(&public_key),
                public_key: base58::encode(&base58::prefix::ED25519_PUBLIC_KEY, &public_key),
                private_key: encode_tezos_secret(&Zeroizing::new(signing_key.to_bytes())),
            })
        }
        Some(ChainKind::Evm) => {
            let secret = decode_evm_secret(private_key)?;
            let signer = PrivateKeySigner::from_slice(&secret[..])
                .map_err(|e| DerivationError::InvalidPrivateKey(e.to_string()))?;
            let verifying_key = *signer.credential().verifying_key();
            let public_key = verifying_key.to_encoded_point(false);
            Ok(AccountCreds {
                chain_kind: ChainKind::Evm,
                address: signer.address().to_checksum(None),
                public_key: format!("0x{}", hex::encode(public_key.as_bytes())),
                private_key: SecretString::from(format!("0x{}", hex::encode(&secret[..]))),
            })
        }
        None => Err(DerivationError::InvalidPrivateKey(
            "unrecognized key encoding".to_string(),
        )),
    }
}

/// Decode an `edsk` key (seed or full secret key form)
pub(crate) fn decode_tezos_secret(private_key: &str) -> Result<SigningKey, DerivationError> {
    if let Some(seed) = base58::decode(&base58::prefix::ED25519_SEED, private_key, 32) {
        let seed = Zeroizing::new(seed);
        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(&seed);
        return Ok(SigningKey::from_bytes(&bytes));
    }
    if let Some(secret) = base58::decode(&base58::prefix::ED25519_SECRET_KEY, private_key, 64) {
        let secret = Zeroizing::new(secret);
        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(&secret[..32]);
        return Ok(SigningKey::from_bytes(&bytes));
    }
    Err(DerivationError::InvalidPrivateKey(
        "malformed edsk key".to_string(),
    ))
}

pub(crate) fn decode_evm_secret(private_key: &str) -> Result<Zeroizing<Vec<u8>>, DerivationError> {
    let digits = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = Zeroizing::new(
        hex::decode(digits).map_err(|_| DerivationError::InvalidPrivateKey("malformed hex key".to_string()))?,
    );
    if bytes.len() != 32 {
        return Err(DerivationError::InvalidPrivateKey(
            "EVM keys are 32 bytes".to_string(),
        ));
    }
    Ok(bytes)
}

fn encode_tezos_secret(secret: &[u8; 32]) -> SecretString {
    SecretString::from(base58::encode(&base58::prefix::ED25519_SEED, secret))
}

fn derive_secp256k1(seed: &[u8], path: &HdPath) -> Result<Zeroizing<[u8; 32]>, DerivationError> {
    let bip32_path: bip32::DerivationPath = path
        .to_string()
        .parse()
        .map_err(|e: bip32::Error| DerivationError::InvalidDerivationPath(e.to_string()))?;
    let xprv = bip32::ExtendedPrivateKey::<k256::ecdsa::SigningKey>::derive_from_path(seed, &bip32_path)
        .map_err(|e| DerivationError::InvalidDerivationPath(e.to_string()))?;
    Ok(Zeroizing::new(xprv.to_bytes()))
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn expose(key: &SecretString) -> &str {
        key.expose_secret()
    }

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn derivation_is_deterministic() {
        for path in [None, Some("m/44'/1729'/0'/0'"), Some("m/44'/60'/0'/0/0")] {
            let a = mnemonic_to_private_key(MNEMONIC, Some("pass"), path).unwrap();
            let b = mnemonic_to_private_key(MNEMONIC, Some("pass"), path).unwrap();
            assert_eq!(a.chain_kind, b.chain_kind);
            assert_eq!(expose(&a.private_key), expose(&b.private_key));
        }
    }

    #[test]
    fn passphrase_changes_the_key() {
        let a = mnemonic_to_private_key(MNEMONIC, None, None).unwrap();
        let b = mnemonic_to_private_key(MNEMONIC, Some("extra"), None).unwrap();
        assert_ne!(expose(&a.private_key), expose(&b.private_key));
    }

    #[test]
    fn evm_prefix_selects_secp256k1() {
        let key = mnemonic_to_private_key(MNEMONIC, None, Some("m/44'/60'/0'/0/0")).unwrap();
        assert_eq!(key.chain_kind, ChainKind::Evm);
        let creds = private_key_to_account_creds(expose(&key.private_key)).unwrap();
        // Well-known first account of the all-abandon mnemonic
        assert_eq!(
            creds.address.to_lowercase(),
            "0x9858effd232b4033e47d90003d41ec34ecaeda94"
        );
    }

    #[test]
    fn other_prefixes_select_ed25519() {
        let key = mnemonic_to_private_key(MNEMONIC, None, Some("m/44'/1729'/0'/0'")).unwrap();
        assert_eq!(key.chain_kind, ChainKind::Tezos);
        let creds = private_key_to_account_creds(expose(&key.private_key)).unwrap();
        assert!(creds.address.starts_with("tz1"));
        assert!(creds.public_key.starts_with("edpk"));
        assert_eq!(expose(&creds.private_key), expose(&key.private_key));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(
            mnemonic_to_private_key("abandon abandon", None, None),
            Err(DerivationError::InvalidMnemonic(_))
        ));
        assert!(matches!(
            mnemonic_to_private_key(MNEMONIC, None, Some("44'/60'")),
            Err(DerivationError::InvalidDerivationPath(_))
        ));
        assert!(matches!(
            mnemonic_to_private_key(MNEMONIC, None, Some("m/44'/1729'/0'/0")),
            Err(DerivationError::InvalidDerivationPath(_))
        ));
    }

    #[test]
    fn known_evm_key_maps_to_known_address() {
        let creds = private_key_to_account_creds(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            creds.address.to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(creds.public_key.starts_with("0x04"));
    }

    #[test]
    fn generated_mnemonics_validate() {
        let phrase = generate_mnemonic(12).unwrap();
        assert_eq!(expose(&phrase).split_whitespace().count(), 12);
        validate_mnemonic(expose(&phrase)).unwrap();
        assert!(generate_mnemonic(13).is_err());
    }

    #[test]
    fn unknown_key_encoding_is_rejected() {
        assert!(matches!(
            private_key_to_account_creds("spsk1234"),
            Err(DerivationError::InvalidPrivateKey(_))
        ));
    }
}
