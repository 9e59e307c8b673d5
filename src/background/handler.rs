//! The trusted background: turns gateway requests into keyring and
//! dispatcher calls
//!
//! SECURITY NOTE:
//! - Every request passes the interceptor pipeline (origin policy first)
//!   before any keyring or dispatcher code runs
//! - Pages reach the background only through the relay, and only with
//!   `PageRequest`; they never get a signer or key material
//! - Signing, broadcasting, revealing the mnemonic and removing accounts
//!   need explicit approval on the confirmation surface

use crate::background::{
    ConfirmationDecision, ConfirmationRequest, Confirmer, PageAction, PublicAccount, WalletNotification, WalletRequest,
    WalletResponse,
};
use crate::background::messages::Sensitive;
use crate::dispatch::{ChainClient, FeeOverrides, OperationDispatcher, OperationParams};
use crate::error::{ProtocolError, VaultError};
use crate::gateway::{RelayedRequest, RequestHandler};
use crate::interceptors::{InterceptorPipeline, RequestContext, INTERNAL_ORIGIN};
use crate::vault::{Account, Keyring};
use crate::wallet::{DryRunSigner, OperationSigner};
use crate::{Error, Result};
use alloy::hex;
use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const NOTIFICATION_BUFFER: usize = 32;

pub struct Background<C: ChainClient + 'static> {
    keyring: Arc<Keyring>,
    dispatcher: Arc<OperationDispatcher<C>>,
    pipeline: InterceptorPipeline,
    confirmer: Arc<dyn Confirmer>,
    notifications: broadcast::Sender<Value>,
    active_account: RwLock<Option<String>>,
}

impl<C: ChainClient + 'static> Background<C> {
    pub fn new(
        keyring: Arc<Keyring>,
        dispatcher: Arc<OperationDispatcher<C>>,
        pipeline: InterceptorPipeline,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            keyring,
            dispatcher,
            pipeline,
            confirmer,
            notifications,
            active_account: RwLock::new(None),
        }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn dispatcher(&self) -> &Arc<OperationDispatcher<C>> {
        &self.dispatcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Handler for a wallet UI surface
    pub fn ui_handler(self: &Arc<Self>) -> Arc<dyn RequestHandler> {
        Arc::new(BoundHandler {
            background: self.clone(),
            binding: Binding::Ui,
        })
    }

    /// Handler for the relay's upstream connection
    pub fn page_handler(self: &Arc<Self>) -> Arc<dyn RequestHandler> {
        Arc::new(BoundHandler {
            background: self.clone(),
            binding: Binding::Relay,
        })
    }

    /// Run one UI request through the interceptor pipeline
    pub async fn handle_ui(&self, request: WalletRequest) -> Result<Value> {
        let context = RequestContext::new(request.kind(), INTERNAL_ORIGIN);
        self.intercepted(&context, self.execute(request)).await
    }

    /// Run one relayed page request through the interceptor pipeline
    pub async fn handle_page(&self, relayed: RelayedRequest) -> Result<Value> {
        let RelayedRequest { origin, payload } = relayed;
        if origin == INTERNAL_ORIGIN {
            return Err(ProtocolError::OriginNotAllowed {
                origin,
                operation: "PageRequest".to_string(),
            }
            .into());
        }
        let action: PageAction = serde_json::from_value(payload)?;
        let context = RequestContext::new(action.kind(), origin.clone());
        self.intercepted(&context, self.execute_page(&origin, action)).await
    }

    async fn intercepted<F>(&self, context: &RequestContext, work: F) -> Result<Value>
    where
        F: std::future::Future<Output = Result<WalletResponse>>,
    {
        self.pipeline
            .run(context, || async move {
                let response = work.await?;
                Ok::<_, Error>(serde_json::to_value(response)?)
            })
            .await
    }

    async fn execute(&self, request: WalletRequest) -> Result<WalletResponse> {
        match request {
            WalletRequest::GetState => Ok(WalletResponse::State {
                initialized: self.keyring.is_initialized().await?,
                unlocked: self.keyring.is_unlocked().await,
            }),
            WalletRequest::Setup { password, mnemonic } => {
                let mnemonic = mnemonic.map(|m| SecretString::from(m.expose().to_string()));
                let accounts = self.keyring.setup(password.expose(), mnemonic).await?;
                self.notify(WalletNotification::Unlocked);
                self.notify(WalletNotification::AccountsChanged {
                    accounts: accounts.clone(),
                });
                Ok(WalletResponse::SetupCompleted { accounts })
            }
            WalletRequest::Unlock { password } => {
                let accounts = self.keyring.unlock(password.expose()).await?;
                self.notify(WalletNotification::Unlocked);
                Ok(WalletResponse::Unlocked { accounts })
            }
            WalletRequest::Lock => {
                self.keyring.lock().await;
                *self.active_account.write() = None;
                self.notify(WalletNotification::Locked);
                Ok(WalletResponse::Locked)
            }
            WalletRequest::GetAccounts => {
                let accounts = self.keyring.accounts().await?;
                let active = self.current_account(&accounts).map(|a| a.address.clone());
                Ok(WalletResponse::Accounts { accounts, active })
            }
            WalletRequest::CreateAccount { chain_kind, name } => {
                let account = self.keyring.create_hd_account(chain_kind, name).await?;
                self.accounts_changed().await;
                Ok(WalletResponse::Account { account })
            }
            WalletRequest::ImportPrivateKey { private_key, name } => {
                let account = self
                    .keyring
                    .import_private_key(private_key.expose(), name)
                    .await?;
                self.accounts_changed().await;
                Ok(WalletResponse::Account { account })
            }
            WalletRequest::ImportMnemonic {
                mnemonic,
                passphrase,
                derivation_path,
                name,
            } => {
                let account = self
                    .keyring
                    .import_mnemonic_account(
                        mnemonic.expose(),
                        passphrase.as_ref().map(Sensitive::expose),
                        derivation_path.as_deref(),
                        name,
                    )
                    .await?;
                self.accounts_changed().await;
                Ok(WalletResponse::Account { account })
            }
            WalletRequest::RevealMnemonic { password } => {
                self.require_approval(&ConfirmationRequest::RevealMnemonic).await?;
                let mnemonic = self.keyring.reveal_mnemonic(password.expose()).await?;
                Ok(WalletResponse::Mnemonic {
                    mnemonic: Sensitive::new(mnemonic.expose_secret()),
                })
            }
            WalletRequest::RemoveAccount { password, address } => {
                self.require_approval(&ConfirmationRequest::RemoveAccount {
                    address: address.clone(),
                })
                .await?;
                let accounts = self.keyring.remove_account(password.expose(), &address).await?;
                {
                    let mut active = self.active_account.write();
                    if active.as_deref() == Some(address.as_str()) {
                        *active = None;
                    }
                }
                self.notify(WalletNotification::AccountsChanged {
                    accounts: accounts.clone(),
                });
                Ok(WalletResponse::Accounts {
                    active: self.current_account(&accounts).map(|a| a.address.clone()),
                    accounts,
                })
            }
            WalletRequest::RenameAccount { address, name } => {
                let account = self.keyring.rename_account(&address, name).await?;
                self.accounts_changed().await;
                Ok(WalletResponse::Account { account })
            }
            WalletRequest::SelectAccount { address } => {
                let account = self.find_account(&address).await?;
                *self.active_account.write() = Some(account.address.clone());
                info!(address = %account.address, "Active account selected");
                Ok(WalletResponse::Account { account })
            }
            WalletRequest::DryRun { source, operations } => {
                let account = self.find_account(&source).await?;
                let signer = DryRunSigner::new(account.chain_kind, &account.address, &account.public_key);
                let outcome = self.dispatcher.dry_run(&signer, &operations).await;
                Ok(WalletResponse::Estimated { outcome })
            }
            WalletRequest::SendOperations {
                source,
                operations,
                overrides,
                wait_for_confirmation,
            } => {
                let account = self.find_account(&source).await?;
                let outcome = self
                    .send_approved(INTERNAL_ORIGIN, &account, operations, &overrides)
                    .await?;
                let confirmed = if wait_for_confirmation {
                    self.dispatcher.wait_for_confirmation(&outcome.op_hash).await?;
                    true
                } else {
                    false
                };
                Ok(WalletResponse::OperationsSent { outcome, confirmed })
            }
            WalletRequest::PageRequest(_) => Err(Error::InvalidArgument(
                "page requests are only accepted from the relay".to_string(),
            )),
        }
    }

    async fn execute_page(&self, origin: &str, action: PageAction) -> Result<WalletResponse> {
        let accounts = self.keyring.accounts().await?;
        let account = self
            .current_account(&accounts)
            .cloned()
            .ok_or_else(|| VaultError::AccountNotFound("no active account".to_string()))?;

        match action {
            PageAction::GetAccount => Ok(WalletResponse::PageAccount {
                account: PublicAccount::from(&account),
            }),
            PageAction::RequestOperations { operations, overrides } => {
                let outcome = self.send_approved(origin, &account, operations, &overrides).await?;
                Ok(WalletResponse::PageOperationsSent {
                    op_hash: outcome.op_hash,
                })
            }
            PageAction::SignPayload { payload } => {
                let bytes = decode_hex(&payload)?;
                self.require_approval(&ConfirmationRequest::SignPayload {
                    origin: origin.to_string(),
                    source: account.address.clone(),
                    payload: hex::encode(&bytes),
                })
                .await?;
                let signer = self.keyring.signer_for(&account.address).await?;
                let signed = signer.sign(&bytes).await?;
                Ok(WalletResponse::PageSigned {
                    bytes: hex::encode(&signed.bytes),
                    signature: signed.signature,
                })
            }
        }
    }

    /// Estimate, ask the user, then send under the real signer
    async fn send_approved(
        &self,
        origin: &str,
        account: &Account,
        operations: Vec<OperationParams>,
        proposed: &FeeOverrides,
    ) -> Result<crate::dispatch::SendOutcome> {
        if operations.is_empty() {
            return Err(crate::error::DispatchError::EmptyBatch.into());
        }
        let preview = DryRunSigner::new(account.chain_kind, &account.address, &account.public_key);
        let estimates = self
            .dispatcher
            .dry_run(&preview, &operations)
            .await
            .map(|outcome| outcome.estimates);

        // Only fees the user accepted on the surface are applied
        let decision = self
            .require_approval(&ConfirmationRequest::Operations {
                origin: origin.to_string(),
                source: account.address.clone(),
                operations: operations.clone(),
                estimates,
                overrides: *proposed,
            })
            .await?;

        let signer = self.keyring.signer_for(&account.address).await?;
        self.dispatcher.send(&signer, operations, &decision.overrides).await
    }

    async fn require_approval(&self, request: &ConfirmationRequest) -> Result<ConfirmationDecision> {
        let decision = self.confirmer.confirm(request).await?;
        if decision.approved {
            Ok(decision)
        } else {
            info!(kind = request.kind(), "User declined");
            Err(Error::Declined)
        }
    }

    async fn find_account(&self, address: &str) -> Result<Account> {
        self.keyring
            .accounts()
            .await?
            .into_iter()
            .find(|a| a.address == address)
            .ok_or_else(|| VaultError::AccountNotFound(address.to_string()).into())
    }

    /// Selected account, falling back to the first one
    fn current_account<'a>(&self, accounts: &'a [Account]) -> Option<&'a Account> {
        let active = self.active_account.read();
        active
            .as_deref()
            .and_then(|address| accounts.iter().find(|a| a.address == address))
            .or_else(|| accounts.first())
    }

    async fn accounts_changed(&self) {
        if let Ok(accounts) = self.keyring.accounts().await {
            self.notify(WalletNotification::AccountsChanged { accounts });
        }
    }

    fn notify(&self, notification: WalletNotification) {
        match serde_json::to_value(&notification) {
            Ok(payload) => {
                // No connected surface is fine
                let _ = self.notifications.send(payload);
            }
            Err(e) => debug!(error = %e, "Could not encode notification"),
        }
    }
}

impl<C: ChainClient + 'static> std::fmt::Debug for Background<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Background")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Ui,
    Relay,
}

struct BoundHandler<C: ChainClient + 'static> {
    background: Arc<Background<C>>,
    binding: Binding,
}

#[async_trait]
impl<C: ChainClient + 'static> RequestHandler for BoundHandler<C> {
    async fn handle(&self, payload: Value) -> Result<Value> {
        let request: WalletRequest = serde_json::from_value(payload)?;
        match (self.binding, request) {
            (Binding::Relay, WalletRequest::PageRequest(relayed)) => {
                self.background.handle_page(relayed).await
            }
            (Binding::Relay, other) => Err(ProtocolError::OriginNotAllowed {
                origin: "relay".to_string(),
                operation: other.kind().to_string(),
            }
            .into()),
            (Binding::Ui, request) => self.background.handle_ui(request).await,
        }
    }
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(trimmed).map_err(|e| Error::InvalidArgument(format!("Invalid hex string: {}", e)))
}
