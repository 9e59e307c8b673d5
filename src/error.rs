//! Error types for the wallet core

use thiserror::Error;

/// Failures of the encrypted secret store and the keyring built on top of it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Invalid password")]
    InvalidPassword,

    #[error("No record stored under {0}")]
    NotFound(String),

    #[error("Decryption failed: wrong password or corrupted record")]
    DecryptionFailed,

    #[error("Wallet is locked")]
    Locked,

    #[error("Wallet is not set up")]
    NotInitialized,

    #[error("Wallet is already set up")]
    AlreadyInitialized,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Fee estimation failed: {0}")]
    EstimationFailed(String),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Timed out waiting for {op_hash} to be included")]
    ConfirmationTimedOut { op_hash: String },

    #[error("Empty operation batch")]
    EmptyBatch,

    #[error("Chain error: {0}")]
    Chain(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Request handler failed: {0}")]
    HandlerThrew(String),

    #[error("Origin {origin} is not allowed to call {operation}")]
    OriginNotAllowed { origin: String, operation: String },

    #[error("Timed out waiting for a response")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("{message}")]
    Remote {
        message: String,
        code: Option<String>,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Request blocked: {0}")]
    Blocked(String),

    #[error("Request declined by user")]
    Declined,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code carried in gateway error responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Vault(e) => match e {
                VaultError::InvalidPassword => "INVALID_PASSWORD",
                VaultError::NotFound(_) => "NOT_FOUND",
                VaultError::DecryptionFailed => "DECRYPTION_FAILED",
                VaultError::Locked => "LOCKED",
                VaultError::NotInitialized => "NOT_INITIALIZED",
                VaultError::AlreadyInitialized => "ALREADY_INITIALIZED",
                VaultError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
                VaultError::AccountExists(_) => "ACCOUNT_EXISTS",
                VaultError::Storage(_) => "STORAGE",
            },
            Error::Derivation(e) => match e {
                DerivationError::InvalidMnemonic(_) => "INVALID_MNEMONIC",
                DerivationError::InvalidDerivationPath(_) => "INVALID_DERIVATION_PATH",
                DerivationError::InvalidPrivateKey(_) => "INVALID_PRIVATE_KEY",
            },
            Error::Dispatch(e) => match e {
                DispatchError::EstimationFailed(_) => "ESTIMATION_FAILED",
                DispatchError::SubmissionFailed(_) => "SUBMISSION_FAILED",
                DispatchError::ConfirmationTimedOut { .. } => "CONFIRMATION_TIMED_OUT",
                DispatchError::EmptyBatch => "EMPTY_BATCH",
                DispatchError::Chain(_) => "CHAIN",
            },
            Error::Protocol(e) => match e {
                ProtocolError::HandlerThrew(_) => "HANDLER_THREW",
                ProtocolError::OriginNotAllowed { .. } => "ORIGIN_NOT_ALLOWED",
                ProtocolError::Timeout => "TIMEOUT",
                ProtocolError::ChannelClosed => "CHANNEL_CLOSED",
                ProtocolError::MalformedMessage(_) => "MALFORMED_MESSAGE",
                ProtocolError::Remote { .. } => "REMOTE",
            },
            Error::Config(_) => "CONFIG",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Blocked(_) => "BLOCKED",
            Error::Declined => "DECLINED",
            Error::Json(_) => "INVALID_ARGUMENT",
            Error::Io(_) => "IO",
        }
    }

    /// Whether the message may carry internal detail that must not reach a page
    pub fn is_sensitive(&self) -> bool {
        !matches!(
            self,
            Error::Protocol(ProtocolError::OriginNotAllowed { .. })
                | Error::Declined
                | Error::Blocked(_)
                | Error::Vault(VaultError::Locked)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
