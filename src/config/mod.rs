//! Configuration for the wallet core

use crate::vault::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the wallet password for CLI commands
pub const PASSWORD_ENV: &str = "WALLET_PASSWORD";

/// Environment variable holding a mnemonic for CLI commands
pub const MNEMONIC_ENV: &str = "WALLET_MNEMONIC";

/// Environment variable holding a private key for CLI commands
pub const PRIVATE_KEY_ENV: &str = "WALLET_PRIVATE_KEY";

/// Secret storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// JSON file holding the encrypted records (in-memory store when unset)
    pub storage_path: Option<String>,
    /// Argon2id parameters used for every record key
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            storage_path: Some("vault.json".to_string()),
            kdf: KdfParams::default(),
        }
    }
}

/// Operation dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// How long to wait for a submitted operation to be included
    pub confirmation_timeout_ms: u64,
    /// Poll interval while waiting for inclusion
    pub confirmation_poll_interval_ms: u64,
}

impl DispatchSettings {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 120_000, // two blocks on a slow chain
            confirmation_poll_interval_ms: 2_000,
        }
    }
}

/// RPC gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// How long a client waits for a terminal response
    pub request_timeout_ms: u64,
    /// How long the background waits for the confirmation surface
    pub confirmation_surface_timeout_ms: u64,
}

impl GatewaySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn confirmation_surface_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_surface_timeout_ms)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            confirmation_surface_timeout_ms: 300_000, // user has five minutes to decide
        }
    }
}

/// Failed unlock throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockSettings {
    /// Consecutive failures tolerated before the cooldown starts
    pub free_attempts: u32,
    /// Seconds unlock stays blocked once the free attempts are used up
    pub cooldown_seconds: u64,
}

impl Default for UnlockSettings {
    fn default() -> Self {
        Self {
            free_attempts: 3,
            cooldown_seconds: 60,
        }
    }
}

/// Default origin policy behavior when policy.json is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDefaultMode {
    /// Internal surfaces may call everything, pages nothing
    #[default]
    InternalOnly,
    DefaultDeny,
}

/// Origin policy settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicySettings {
    /// Default mode when policy.json is missing
    #[serde(default)]
    pub default_mode: PolicyDefaultMode,
    /// Require policy.json to be present (fail closed if missing)
    #[serde(default)]
    pub require_file: bool,
    /// Directory containing policy.json
    #[serde(default)]
    pub policy_dir: Option<String>,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub unlock: UnlockSettings,
    #[serde(default)]
    pub policy: PolicySettings,
    /// Path to audit log file
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}
