//! Encrypted-at-rest secret storage

use crate::error::VaultError;
use crate::vault::record::{open, seal};
use crate::vault::{PassKey, SecretStorage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Password-protected store of serializable secrets
///
/// Plaintext exists only transiently inside `encrypt_and_store` and
/// `fetch_and_decrypt`; it is never logged.
#[derive(Clone)]
pub struct SecretVault {
    storage: Arc<dyn SecretStorage>,
}

impl SecretVault {
    pub fn new(storage: Arc<dyn SecretStorage>) -> Self {
        Self { storage }
    }

    pub async fn encrypt_and_store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        plaintext: &T,
        pass_key: &PassKey,
    ) -> Result<(), VaultError> {
        let bytes = Zeroizing::new(
            serde_json::to_vec(plaintext).map_err(|e| VaultError::Storage(e.to_string()))?,
        );
        let pass_key = pass_key.clone();
        let record = run_kdf(move || seal(&bytes, &pass_key)).await?;
        self.storage.put(key, record).await?;
        tracing::debug!(key, "Stored encrypted record");
        Ok(())
    }

    pub async fn fetch_and_decrypt<T: DeserializeOwned>(
        &self,
        key: &str,
        pass_key: &PassKey,
    ) -> Result<T, VaultError> {
        let record = self
            .storage
            .get(key)
            .await?
            .ok_or_else(|| VaultError::NotFound(key.to_string()))?;
        let pass_key = pass_key.clone();
        let bytes = run_kdf(move || open(&record, &pass_key)).await?;
        // Authenticated bytes that fail to parse mean the record was written
        // by something else; treat it like any other undecryptable record.
        serde_json::from_slice(&bytes).map_err(|_| VaultError::DecryptionFailed)
    }

    pub async fn is_stored(&self, key: &str) -> Result<bool, VaultError> {
        self.storage.contains(key).await
    }

    pub async fn remove_many(&self, keys: &[String]) -> Result<(), VaultError> {
        self.storage.remove(keys).await?;
        tracing::debug!(count = keys.len(), "Removed encrypted records");
        Ok(())
    }
}

/// Argon2 is memory- and CPU-hard; keep it off the async workers
async fn run_kdf<T, F>(work: F) -> Result<T, VaultError>
where
    F: FnOnce() -> Result<T, VaultError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| VaultError::Storage(format!("key derivation task failed: {}", e)))?
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{KdfParams, MemoryStorage};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Imported {
        private_key: String,
        tags: Vec<String>,
    }

    fn vault() -> SecretVault {
        SecretVault::new(Arc::new(MemoryStorage::new()))
    }

    fn pass_key(password: &str) -> PassKey {
        PassKey::from_password(password, KdfParams::insecure_fast())
    }

    #[tokio::test]
    async fn round_trip_structured_value() {
        let vault = vault();
        let key = pass_key("pw");
        let value = Imported {
            private_key: "edsk...".to_string(),
            tags: vec!["main".to_string()],
        };
        vault.encrypt_and_store("acc", &value, &key).await.unwrap();
        let back: Imported = vault.fetch_and_decrypt("acc", &key).await.unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn wrong_password_is_decryption_failed() {
        let vault = vault();
        vault
            .encrypt_and_store("seed", "abandon abandon", &pass_key("right"))
            .await
            .unwrap();
        let err = vault
            .fetch_and_decrypt::<String>("seed", &pass_key("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::DecryptionFailed);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let err = vault()
            .fetch_and_decrypt::<String>("nothing", &pass_key("pw"))
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::NotFound("nothing".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn key_derivation_does_not_stall_the_event_loop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        tokio::task::yield_now().await;

        let vault = vault();
        let key = PassKey::from_password("pw", KdfParams::default());
        vault.encrypt_and_store("seed", "abandon", &key).await.unwrap();
        let back: String = vault.fetch_and_decrypt("seed", &key).await.unwrap();
        assert_eq!(back, "abandon");

        ticker.abort();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn is_stored_and_remove_many() {
        let vault = vault();
        let key = pass_key("pw");
        vault.encrypt_and_store("a", &1u32, &key).await.unwrap();
        vault.encrypt_and_store("b", &2u32, &key).await.unwrap();
        assert!(vault.is_stored("a").await.unwrap());

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        vault.remove_many(&keys).await.unwrap();
        vault.remove_many(&keys).await.unwrap();
        assert!(!vault.is_stored("a").await.unwrap());
        assert!(!vault.is_stored("b").await.unwrap());
    }
}
