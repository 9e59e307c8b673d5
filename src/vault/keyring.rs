//! Wallet keyring: the master secret, its accounts and their keys
//!
//! Persisted records (all encrypted under the wallet password):
//! - `check`: fixed marker used to verify the password
//! - `mnemonic`: the master mnemonic
//! - `accounts`: the account list
//! - `account_key:<address>`: one private key per account
//!
//! The decrypted mnemonic and the password material live only inside the
//! in-memory session between `unlock` and `lock`.

use crate::derivation::{
    mnemonic_to_private_key, private_key_to_account_creds, validate_mnemonic, AccountCreds,
    ChainKind,
};
use crate::error::VaultError;
use crate::vault::{KdfParams, PassKey, SecretVault};
use crate::wallet::SecureSigner;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const CHECK_KEY: &str = "check";
const CHECK_VALUE: &str = "wallet-core-check";
const MNEMONIC_KEY: &str = "mnemonic";
const ACCOUNTS_KEY: &str = "accounts";

fn account_key(address: &str) -> String {
    format!("account_key:{}", address)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountOrigin {
    /// Derived from the wallet mnemonic
    Hd,
    /// Brought in as a raw key or a foreign mnemonic
    Imported,
}

/// A signing account; public data only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub chain_kind: ChainKind,
    pub derivation_path: Option<String>,
    pub address: String,
    pub public_key: String,
    pub name: String,
    pub origin: AccountOrigin,
    /// Position on the wallet's HD path template, for `Hd` accounts
    pub hd_index: Option<u32>,
}

impl Account {
    fn new(
        creds: &AccountCreds,
        derivation_path: Option<String>,
        name: String,
        origin: AccountOrigin,
        hd_index: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_kind: creds.chain_kind,
            derivation_path,
            address: creds.address.clone(),
            public_key: creds.public_key.clone(),
            name,
            origin,
            hd_index,
        }
    }
}

struct Session {
    pass_key: PassKey,
    mnemonic: SecretString,
    accounts: Vec<Account>,
}

/// Wallet-level secret management on top of `SecretVault`
pub struct Keyring {
    vault: SecretVault,
    kdf: KdfParams,
    session: RwLock<Option<Session>>,
}

impl Keyring {
    pub fn new(vault: SecretVault, kdf: KdfParams) -> Self {
        Self {
            vault,
            kdf,
            session: RwLock::new(None),
        }
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.vault.is_stored(CHECK_KEY).await?)
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Create the wallet and its first account; leaves the wallet unlocked
    ///
    /// A fresh 12-word mnemonic is generated when none is supplied.
    pub async fn setup(&self, password: &str, mnemonic: Option<SecretString>) -> Result<Vec<Account>> {
        if password.is_empty() {
            return Err(Error::InvalidArgument("password must not be empty".to_string()));
        }
        if self.is_initialized().await? {
            return Err(VaultError::AlreadyInitialized.into());
        }
        let mnemonic = match mnemonic {
            Some(m) => m,
            None => crate::derivation::generate_mnemonic(12)?,
        };
        validate_mnemonic(mnemonic.expose_secret())?;

        let pass_key = PassKey::from_password(password, self.kdf);
        let (account, creds) = derive_hd_account(&mnemonic, ChainKind::Tezos, 0, None)?;

        let mut session = self.session.write().await;
        self.vault
            .encrypt_and_store(&account_key(&account.address), creds.private_key.expose_secret(), &pass_key)
            .await?;
        self.vault
            .encrypt_and_store(MNEMONIC_KEY, mnemonic.expose_secret(), &pass_key)
            .await?;
        let accounts = vec![account];
        self.vault
            .encrypt_and_store(ACCOUNTS_KEY, &accounts, &pass_key)
            .await?;
        // Written last: its presence marks a completed setup
        self.vault
            .encrypt_and_store(CHECK_KEY, CHECK_VALUE, &pass_key)
            .await?;

        info!(accounts = accounts.len(), "Wallet set up");
        *session = Some(Session {
            pass_key,
            mnemonic,
            accounts: accounts.clone(),
        });
        Ok(accounts)
    }

    /// Verify `password` and load the session
    pub async fn unlock(&self, password: &str) -> Result<Vec<Account>> {
        let pass_key = self.verify_password(password).await?;
        let mnemonic: String = self.vault.fetch_and_decrypt(MNEMONIC_KEY, &pass_key).await?;
        let accounts: Vec<Account> = self.vault.fetch_and_decrypt(ACCOUNTS_KEY, &pass_key).await?;

        info!(accounts = accounts.len(), "Wallet unlocked");
        *self.session.write().await = Some(Session {
            pass_key,
            mnemonic: SecretString::from(mnemonic),
            accounts: accounts.clone(),
        });
        Ok(accounts)
    }

    /// Drop the in-memory master secret
    pub async fn lock(&self) {
        if self.session.write().await.take().is_some() {
            info!("Wallet locked");
        }
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(VaultError::Locked)?;
        Ok(session.accounts.clone())
    }

    /// Derive the next HD account of `chain_kind`
    pub async fn create_hd_account(&self, chain_kind: ChainKind, name: Option<String>) -> Result<Account> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(VaultError::Locked)?;

        let index = session
            .accounts
            .iter()
            .filter(|a| a.origin == AccountOrigin::Hd && a.chain_kind == chain_kind)
            .filter_map(|a| a.hd_index)
            .max()
            .map_or(0, |i| i + 1);
        let (account, creds) = derive_hd_account(&session.mnemonic, chain_kind, index, name)?;
        self.insert_account(session, account, &creds).await
    }

    pub async fn import_private_key(&self, private_key: &str, name: Option<String>) -> Result<Account> {
        let creds = private_key_to_account_creds(private_key)?;
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(VaultError::Locked)?;
        let name = name.unwrap_or_else(|| default_name(&session.accounts, creds.chain_kind));
        let account = Account::new(&creds, None, name, AccountOrigin::Imported, None);
        self.insert_account(session, account, &creds).await
    }

    /// Import the key a foreign mnemonic derives at `derivation_path`
    pub async fn import_mnemonic_account(
        &self,
        mnemonic: &str,
        passphrase: Option<&str>,
        derivation_path: Option<&str>,
        name: Option<String>,
    ) -> Result<Account> {
        let derived = mnemonic_to_private_key(mnemonic, passphrase, derivation_path)?;
        let creds = private_key_to_account_creds(derived.private_key.expose_secret())?;
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(VaultError::Locked)?;
        let name = name.unwrap_or_else(|| default_name(&session.accounts, creds.chain_kind));
        let account = Account::new(
            &creds,
            derivation_path.map(str::to_string),
            name,
            AccountOrigin::Imported,
            None,
        );
        self.insert_account(session, account, &creds).await
    }

    /// Return the mnemonic after re-checking the password
    pub async fn reveal_mnemonic(&self, password: &str) -> Result<SecretString> {
        let pass_key = self.verify_password(password).await?;
        let mnemonic: String = self.vault.fetch_and_decrypt(MNEMONIC_KEY, &pass_key).await?;
        warn!("Mnemonic revealed");
        Ok(SecretString::from(mnemonic))
    }

    /// Delete an account and its key after re-checking the password
    pub async fn remove_account(&self, password: &str, address: &str) -> Result<Vec<Account>> {
        self.verify_password(password).await?;
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(VaultError::Locked)?;

        let position = session
            .accounts
            .iter()
            .position(|a| a.address == address)
            .ok_or_else(|| VaultError::AccountNotFound(address.to_string()))?;
        if session.accounts.len() == 1 {
            return Err(Error::InvalidArgument(
                "cannot remove the only account".to_string(),
            ));
        }

        let mut accounts = session.accounts.clone();
        accounts.remove(position);
        self.vault
            .encrypt_and_store(ACCOUNTS_KEY, &accounts, &session.pass_key)
            .await?;
        self.vault.remove_many(&[account_key(address)]).await?;
        session.accounts = accounts.clone();

        info!(address, "Account removed");
        Ok(accounts)
    }

    pub async fn rename_account(&self, address: &str, name: String) -> Result<Account> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(VaultError::Locked)?;

        let mut accounts = session.accounts.clone();
        let account = accounts
            .iter_mut()
            .find(|a| a.address == address)
            .ok_or_else(|| VaultError::AccountNotFound(address.to_string()))?;
        account.name = name;
        let renamed = account.clone();

        self.vault
            .encrypt_and_store(ACCOUNTS_KEY, &accounts, &session.pass_key)
            .await?;
        session.accounts = accounts;
        Ok(renamed)
    }

    /// Decrypt an account's key into a signer
    pub async fn signer_for(&self, address: &str) -> Result<SecureSigner> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(VaultError::Locked)?;
        if !session.accounts.iter().any(|a| a.address == address) {
            return Err(VaultError::AccountNotFound(address.to_string()).into());
        }
        let private_key: String = self
            .vault
            .fetch_and_decrypt(&account_key(address), &session.pass_key)
            .await?;
        let private_key = SecretString::from(private_key);
        SecureSigner::from_private_key(private_key.expose_secret())
    }

    async fn verify_password(&self, password: &str) -> Result<PassKey> {
        let pass_key = PassKey::from_password(password, self.kdf);
        match self.vault.fetch_and_decrypt::<String>(CHECK_KEY, &pass_key).await {
            Ok(value) if value == CHECK_VALUE => Ok(pass_key),
            Ok(_) | Err(VaultError::DecryptionFailed) => {
                warn!("Password check failed");
                Err(VaultError::InvalidPassword.into())
            }
            Err(VaultError::NotFound(_)) => Err(VaultError::NotInitialized.into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_account(
        &self,
        session: &mut Session,
        account: Account,
        creds: &AccountCreds,
    ) -> Result<Account> {
        if session.accounts.iter().any(|a| a.address == account.address) {
            return Err(VaultError::AccountExists(account.address).into());
        }

        let mut accounts = session.accounts.clone();
        accounts.push(account.clone());
        self.vault
            .encrypt_and_store(
                &account_key(&account.address),
                creds.private_key.expose_secret(),
                &session.pass_key,
            )
            .await?;
        self.vault
            .encrypt_and_store(ACCOUNTS_KEY, &accounts, &session.pass_key)
            .await?;
        session.accounts = accounts;

        info!(
            address = %account.address,
            chain = account.chain_kind.name(),
            origin = ?account.origin,
            "Account added"
        );
        Ok(account)
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("kdf", &self.kdf)
            .field("session", &"[REDACTED]")
            .finish()
    }
}

fn derive_hd_account(
    mnemonic: &SecretString,
    chain_kind: ChainKind,
    index: u32,
    name: Option<String>,
) -> Result<(Account, AccountCreds)> {
    let path = chain_kind.account_path(index);
    let derived = mnemonic_to_private_key(mnemonic.expose_secret(), None, Some(&path))?;
    let creds = private_key_to_account_creds(derived.private_key.expose_secret())?;
    let name = name.unwrap_or_else(|| format!("Account {}", index + 1));
    let account = Account::new(&creds, Some(path), name, AccountOrigin::Hd, Some(index));
    Ok((account, creds))
}

fn default_name(accounts: &[Account], chain_kind: ChainKind) -> String {
    let imported = accounts
        .iter()
        .filter(|a| a.origin == AccountOrigin::Imported && a.chain_kind == chain_kind)
        .count();
    format!("Imported {} {}", chain_kind.name(), imported + 1)
}
