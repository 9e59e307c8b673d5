//! Prefixed base58check encodings for default-curve (ed25519) keys

use blake2::digest::consts::U20;
use blake2::{Blake2b, Digest};

/// Encoding prefixes; the leading bytes make the text form start with the tag
pub mod prefix {
    /// 32-byte ed25519 seed, renders as `edsk...` (54 chars)
    pub const ED25519_SEED: [u8; 4] = [13, 15, 58, 7];
    /// 64-byte ed25519 secret key, renders as `edsk...` (98 chars)
    pub const ED25519_SECRET_KEY: [u8; 4] = [43, 246, 78, 7];
    /// ed25519 public key, renders as `edpk...`
    pub const ED25519_PUBLIC_KEY: [u8; 4] = [13, 15, 37, 217];
    /// ed25519 public key hash, renders as `tz1...`
    pub const ED25519_PUBLIC_KEY_HASH: [u8; 3] = [6, 161, 159];
    /// ed25519 signature, renders as `edsig...`
    pub const ED25519_SIGNATURE: [u8; 5] = [9, 245, 205, 134, 18];
}

type Blake2b160 = Blake2b<U20>;

pub fn encode(prefix: &[u8], payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(prefix.len() + payload.len());
    bytes.extend_from_slice(prefix);
    bytes.extend_from_slice(payload);
    bs58::encode(bytes).with_check().into_string()
}

/// Decode and strip `prefix`; `None` on checksum, prefix or length mismatch
pub fn decode(prefix: &[u8], text: &str, payload_len: usize) -> Option<Vec<u8>> {
    let bytes = bs58::decode(text).with_check(None).into_vec().ok()?;
    let payload = bytes.strip_prefix(prefix)?;
    (payload.len() == payload_len).then(|| payload.to_vec())
}

/// `tz1` address of an ed25519 public key
pub fn public_key_hash(public_key: &[u8; 32]) -> String {
    let hash = Blake2b160::digest(public_key);
    encode(&prefix::ED25519_PUBLIC_KEY_HASH, &hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_render_expected_tags() {
        assert!(encode(&prefix::ED25519_SEED, &[7u8; 32]).starts_with("edsk"));
        assert!(encode(&prefix::ED25519_PUBLIC_KEY, &[7u8; 32]).starts_with("edpk"));
        assert!(public_key_hash(&[7u8; 32]).starts_with("tz1"));
        assert!(encode(&prefix::ED25519_SIGNATURE, &[7u8; 64]).starts_with("edsig"));
    }

    #[test]
    fn decode_checks_prefix_and_length() {
        let text = encode(&prefix::ED25519_SEED, &[9u8; 32]);
        assert_eq!(decode(&prefix::ED25519_SEED, &text, 32), Some(vec![9u8; 32]));
        assert_eq!(decode(&prefix::ED25519_PUBLIC_KEY, &text, 32), None);
        assert_eq!(decode(&prefix::ED25519_SEED, &text, 64), None);
        assert_eq!(decode(&prefix::ED25519_SEED, "edsknotbase58!", 32), None);
    }
}
