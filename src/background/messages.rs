//! Typed payloads carried by gateway envelopes to and from the background

use crate::derivation::ChainKind;
use crate::dispatch::{DryRunOutcome, FeeOverrides, OperationParams, SendOutcome};
use crate::gateway::RelayedRequest;
use crate::vault::Account;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Secret text in a request or response; redacted in `Debug`, wiped on drop
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for Sensitive {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Requests accepted from wallet UI surfaces (and, as `PageRequest`, from the relay)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum WalletRequest {
    GetState,
    Setup {
        password: Sensitive,
        #[serde(default)]
        mnemonic: Option<Sensitive>,
    },
    Unlock {
        password: Sensitive,
    },
    Lock,
    GetAccounts,
    CreateAccount {
        chain_kind: ChainKind,
        #[serde(default)]
        name: Option<String>,
    },
    ImportPrivateKey {
        private_key: Sensitive,
        #[serde(default)]
        name: Option<String>,
    },
    ImportMnemonic {
        mnemonic: Sensitive,
        #[serde(default)]
        passphrase: Option<Sensitive>,
        #[serde(default)]
        derivation_path: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    RevealMnemonic {
        password: Sensitive,
    },
    RemoveAccount {
        password: Sensitive,
        address: String,
    },
    RenameAccount {
        address: String,
        name: String,
    },
    SelectAccount {
        address: String,
    },
    DryRun {
        source: String,
        operations: Vec<OperationParams>,
    },
    SendOperations {
        source: String,
        operations: Vec<OperationParams>,
        #[serde(default)]
        overrides: FeeOverrides,
        #[serde(default)]
        wait_for_confirmation: bool,
    },
    PageRequest(RelayedRequest),
}

impl WalletRequest {
    /// Operation name seen by interceptors and the origin policy
    pub fn kind(&self) -> &'static str {
        match self {
            WalletRequest::GetState => "GetState",
            WalletRequest::Setup { .. } => "Setup",
            WalletRequest::Unlock { .. } => "Unlock",
            WalletRequest::Lock => "Lock",
            WalletRequest::GetAccounts => "GetAccounts",
            WalletRequest::CreateAccount { .. } => "CreateAccount",
            WalletRequest::ImportPrivateKey { .. } => "ImportPrivateKey",
            WalletRequest::ImportMnemonic { .. } => "ImportMnemonic",
            WalletRequest::RevealMnemonic { .. } => "RevealMnemonic",
            WalletRequest::RemoveAccount { .. } => "RemoveAccount",
            WalletRequest::RenameAccount { .. } => "RenameAccount",
            WalletRequest::SelectAccount { .. } => "SelectAccount",
            WalletRequest::DryRun { .. } => "DryRun",
            WalletRequest::SendOperations { .. } => "SendOperations",
            WalletRequest::PageRequest(_) => "PageRequest",
        }
    }
}

/// What a page may ask for, inside a relayed request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PageAction {
    GetAccount,
    RequestOperations {
        operations: Vec<OperationParams>,
        #[serde(default)]
        overrides: FeeOverrides,
    },
    /// Sign raw bytes, hex encoded
    SignPayload {
        payload: String,
    },
}

impl PageAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PageAction::GetAccount => "GetAccount",
            PageAction::RequestOperations { .. } => "RequestOperations",
            PageAction::SignPayload { .. } => "SignPayload",
        }
    }
}

/// Public view of an account handed to pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub address: String,
    pub public_key: String,
    pub chain_kind: ChainKind,
}

impl From<&Account> for PublicAccount {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address.clone(),
            public_key: account.public_key.clone(),
            chain_kind: account.chain_kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum WalletResponse {
    State {
        initialized: bool,
        unlocked: bool,
    },
    SetupCompleted {
        accounts: Vec<Account>,
    },
    Unlocked {
        accounts: Vec<Account>,
    },
    Locked,
    Accounts {
        accounts: Vec<Account>,
        active: Option<String>,
    },
    Account {
        account: Account,
    },
    Mnemonic {
        mnemonic: Sensitive,
    },
    Estimated {
        outcome: Option<DryRunOutcome>,
    },
    OperationsSent {
        outcome: SendOutcome,
        confirmed: bool,
    },
    PageAccount {
        account: PublicAccount,
    },
    PageOperationsSent {
        op_hash: String,
    },
    PageSigned {
        bytes: String,
        signature: String,
    },
}

/// Pushed to every connected wallet UI surface
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum WalletNotification {
    Unlocked,
    Locked,
    AccountsChanged { accounts: Vec<Account> },
}
