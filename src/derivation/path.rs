//! BIP32-style derivation path parsing

use crate::error::DerivationError;
use std::fmt;
use std::str::FromStr;

pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Purpose and coin type selecting the EVM curve
const EVM_PREFIX: [u32; 2] = [44 | HARDENED_OFFSET, 60 | HARDENED_OFFSET];

/// Parsed derivation path such as `m/44'/1729'/0'/0'`
///
/// Indices keep the hardened bit set, so `44'` is stored as `0x8000002c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdPath {
    indices: Vec<u32>,
}

impl HdPath {
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// `m/44'/60'/...` selects secp256k1, everything else the default curve
    pub fn is_evm(&self) -> bool {
        self.indices.starts_with(&EVM_PREFIX)
    }

    pub fn all_hardened(&self) -> bool {
        self.indices.iter().all(|i| i & HARDENED_OFFSET != 0)
    }
}

impl FromStr for HdPath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DerivationError::InvalidDerivationPath(format!("{s}: {reason}"));

        let mut segments = s.trim().split('/');
        if segments.next() != Some("m") {
            return Err(invalid("must start with m"));
        }

        let mut indices = Vec::new();
        for segment in segments {
            let (digits, hardened) = match segment
                .strip_suffix('\'')
                .or_else(|| segment.strip_suffix('h'))
            {
                Some(digits) => (digits, true),
                None => (segment, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("segments must be decimal indices"));
            }
            let index: u32 = digits.parse().map_err(|_| invalid("index out of range"))?;
            if index >= HARDENED_OFFSET {
                return Err(invalid("index out of range"));
            }
            indices.push(if hardened { index | HARDENED_OFFSET } else { index });
        }

        if indices.is_empty() {
            return Err(invalid("path has no indices"));
        }
        Ok(Self { indices })
    }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.indices {
            if index & HARDENED_OFFSET != 0 {
                write!(f, "/{}'", index & !HARDENED_OFFSET)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}
