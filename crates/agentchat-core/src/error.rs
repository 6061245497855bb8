use thiserror::Error;

use crate::collab::SubmitError;
use crate::installation::StoreError;
use crate::wallet::SignerError;

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by the chat engine.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no usable wallet after {attempts} attempts")]
    WalletUnavailable { attempts: u32 },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("signature request was rejected")]
    SignatureRejected,

    #[error("persistent storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("installation credential is corrupted: {reason}")]
    CorruptedInstallationCredential { reason: String },

    #[error("installation quota exceeded (stored credential: {has_stored_credential})")]
    InstallationQuotaExceeded { has_stored_credential: bool },

    #[error("conversation {conversation_id} is inactive")]
    ConversationInactive { conversation_id: String },

    #[error("message stream error: {0}")]
    Stream(NetworkError),

    #[error("not connected")]
    NotConnected,

    #[error("no agent configured")]
    AgentNotConfigured,

    #[error("agent {address} has no inbox on this network")]
    AgentUnresolved { address: String },

    #[error("message {0} is not a transaction request")]
    NotATransaction(String),

    #[error("wallet signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    #[error("transaction error: {0}")]
    Transaction(#[from] SubmitError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Retry the same operation, possibly after backoff.
    Retry,
    /// Ask the user to approve the signature again.
    RetryOnDemand,
    /// This environment cannot host a session; use another channel.
    UseAnotherChannel,
    /// Clear the local installation credential, then reconnect.
    ClearLocalCredential,
    /// Revoke installations registered on the network, then reconnect.
    RevokeInstallations,
    /// Re-sync the conversation and try again.
    Resync,
    /// Nothing to do; the condition was logged.
    None,
}

impl ChatError {
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::WalletUnavailable { .. } | Self::NotConnected | Self::Network(_) => {
                Remediation::Retry
            }
            Self::NotAuthenticated
            | Self::SignatureRejected
            | Self::Signer(_)
            | Self::Transaction(_) => Remediation::RetryOnDemand,
            Self::StorageUnavailable { .. } | Self::Store(_) => Remediation::UseAnotherChannel,
            Self::CorruptedInstallationCredential { .. } => Remediation::ClearLocalCredential,
            Self::InstallationQuotaExceeded {
                has_stored_credential: true,
            } => Remediation::ClearLocalCredential,
            Self::InstallationQuotaExceeded {
                has_stored_credential: false,
            } => Remediation::RevokeInstallations,
            Self::ConversationInactive { .. } => Remediation::Resync,
            Self::AgentNotConfigured | Self::AgentUnresolved { .. } => Remediation::UseAnotherChannel,
            Self::Stream(_) | Self::NotATransaction(_) => Remediation::None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.remediation(),
            Remediation::UseAnotherChannel | Remediation::RevokeInstallations
        )
    }

    /// The single error string shown to the user when connecting fails.
    pub fn user_message(&self) -> String {
        match self {
            Self::WalletUnavailable { .. } => {
                "No wallet is available yet. Reconnect your wallet and try again.".to_string()
            }
            Self::NotAuthenticated => "Sign in to start chatting.".to_string(),
            Self::SignatureRejected => {
                "The signature request was declined. Approve it to connect.".to_string()
            }
            Self::StorageUnavailable { .. } => {
                "This environment blocks the storage secure messaging needs. Open the chat in a browser or another app.".to_string()
            }
            Self::CorruptedInstallationCredential { .. } => {
                "Your stored installation key is corrupted. Clear it and reconnect.".to_string()
            }
            Self::InstallationQuotaExceeded {
                has_stored_credential: true,
            } => "Installation limit reached. Your stored installation key may be invalid: clear it and reconnect.".to_string(),
            Self::InstallationQuotaExceeded {
                has_stored_credential: false,
            } => "Installation limit reached. Revoke your existing installations to connect this device.".to_string(),
            Self::ConversationInactive { .. } => {
                "The conversation is not active yet. Refresh and try again.".to_string()
            }
            Self::AgentNotConfigured | Self::AgentUnresolved { .. } => {
                "The agent is not reachable on this network.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Structured error codes reported by the messaging network client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorCode {
    InstallationQuota,
    SignatureRejected,
    InvalidInstallationKey,
    StorageUnavailable,
    ConversationNotFound,
    ConversationInactive,
    StreamClosed,
    Unavailable,
    Other,
}

impl NetworkErrorCode {
    /// Compatibility shim for clients that only report free-form messages.
    ///
    /// Only used when a client cannot supply a code itself; callers should
    /// construct [`NetworkError`] with an explicit code whenever possible.
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("installation limit")
            || msg.contains("too many installations")
            || msg.contains("10/10 installations")
        {
            return Self::InstallationQuota;
        }
        if msg.contains("user rejected")
            || msg.contains("user denied")
            || msg.contains("rejected the request")
        {
            return Self::SignatureRejected;
        }
        if msg.contains("hexadecimal") || msg.contains("sqlstate") {
            return Self::InvalidInstallationKey;
        }
        if msg.contains("opfs") || msg.contains("indexeddb") || msg.contains("sharedarraybuffer") {
            return Self::StorageUnavailable;
        }
        if msg.contains("inactive") {
            return Self::ConversationInactive;
        }
        if msg.contains("not found") {
            return Self::ConversationNotFound;
        }
        Self::Other
    }
}

/// An error reported by the messaging network client.
#[derive(Debug, Clone, Error)]
#[error("{message} ({code:?})")]
pub struct NetworkError {
    pub code: NetworkErrorCode,
    pub message: String,
}

impl NetworkError {
    pub fn new(code: NetworkErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an error from a message only, inferring the code.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: NetworkErrorCode::classify_message(&message),
            message,
        }
    }
}
