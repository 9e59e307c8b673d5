//! Backing stores for encrypted records
//!
//! Stores only ever see ciphertext. Writes to the same key are
//! last-write-wins.

use crate::error::VaultError;
use crate::vault::EncryptedRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

/// Key/value persistence for encrypted records
#[async_trait]
pub trait SecretStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<EncryptedRecord>, VaultError>;

    async fn put(&self, key: &str, record: EncryptedRecord) -> Result<(), VaultError>;

    async fn contains(&self, key: &str) -> Result<bool, VaultError>;

    /// Delete every key present; missing keys are ignored
    async fn remove(&self, keys: &[String]) -> Result<(), VaultError>;
}

/// Process-local store, used by tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<String, EncryptedRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<EncryptedRecord>, VaultError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, record: EncryptedRecord) -> Result<(), VaultError> {
        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, VaultError> {
        Ok(self.records.read().await.contains_key(key))
    }

    async fn remove(&self, keys: &[String]) -> Result<(), VaultError> {
        let mut records = self.records.write().await;
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }
}

/// Single JSON document holding every record, rewritten atomically on change
pub struct JsonFileStorage {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, EncryptedRecord>>>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<HashMap<String, EncryptedRecord>, VaultError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| VaultError::Storage(format!("corrupt store file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(VaultError::Storage(e.to_string())),
        }
    }

    async fn flush(&self, records: &HashMap<String, EncryptedRecord>) -> Result<(), VaultError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Run `f` against the cached record map, loading it on first use
    ///
    /// Changes reach the cache only once they are on disk.
    async fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, EncryptedRecord>) -> (T, bool),
    ) -> Result<T, VaultError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        let mut staged = cache.clone().unwrap_or_default();
        let (out, dirty) = f(&mut staged);
        if dirty {
            self.flush(&staged).await?;
            *cache = Some(staged);
        }
        Ok(out)
    }
}

#[async_trait]
impl SecretStorage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<EncryptedRecord>, VaultError> {
        self.with_records(|records| (records.get(key).cloned(), false))
            .await
    }

    async fn put(&self, key: &str, record: EncryptedRecord) -> Result<(), VaultError> {
        self.with_records(|records| {
            records.insert(key.to_string(), record);
            ((), true)
        })
        .await
    }

    async fn contains(&self, key: &str) -> Result<bool, VaultError> {
        self.with_records(|records| (records.contains_key(key), false))
            .await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), VaultError> {
        self.with_records(|records| {
            let mut dirty = false;
            for key in keys {
                dirty |= records.remove(key).is_some();
            }
            ((), dirty)
        })
        .await
    }
}

impl std::fmt::Debug for JsonFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStorage")
            .field("path", &self.path)
            .finish()
    }
}
