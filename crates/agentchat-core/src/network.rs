//! Client abstraction over the encrypted messaging network.
//!
//! The engine never talks to the wire protocol directly; an SDK adapter (or
//! the in-memory loopback network) implements these traits.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::NetworkEnv;
use crate::error::NetworkError;
use crate::installation::InstallationCredential;
use crate::wallet::IdentitySigner;

/// Per-conversation visibility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Unknown,
    Allowed,
    Denied,
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::Unknown => write!(f, "unknown"),
            ConsentState::Allowed => write!(f, "allowed"),
            ConsentState::Denied => write!(f, "denied"),
        }
    }
}

/// Every consent state. A counterparty may not be `allowed` yet, so syncs and
/// listings always span all three.
pub const ALL_CONSENT_STATES: [ConsentState; 3] = [
    ConsentState::Allowed,
    ConsentState::Unknown,
    ConsentState::Denied,
];

/// Parameters for creating or resuming a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Lowercase wallet address.
    pub identifier: String,
    pub env: NetworkEnv,
    /// Credential identifying this device's installation.
    pub installation_key: InstallationCredential,
    /// Whether `installation_key` was loaded from storage rather than
    /// generated for this attempt.
    pub resumed: bool,
    pub signer: IdentitySigner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationInfo {
    pub id: String,
    pub created_at_ms: u64,
}

#[async_trait]
pub trait MessagingNetwork: Send + Sync {
    /// Whether this environment offers the persistent storage a session
    /// database requires.
    fn persistent_storage_available(&self) -> bool;

    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<Arc<dyn NetworkSession>, NetworkError>;

    /// Inbox id registered for a wallet address, if that wallet has ever
    /// joined the network.
    async fn inbox_id_for_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<String>, NetworkError>;

    /// Revoke every installation of `identifier` without holding a session,
    /// for when the quota prevents creating one.
    async fn revoke_all_installations(
        &self,
        identifier: &str,
        signer: &IdentitySigner,
    ) -> Result<usize, NetworkError>;
}

/// A live handle bound to one identity.
#[async_trait]
pub trait NetworkSession: Send + Sync {
    fn inbox_id(&self) -> String;

    fn installation_id(&self) -> String;

    async fn sync_all(&self, consent: &[ConsentState]) -> Result<(), NetworkError>;

    async fn list_dms(
        &self,
        consent: &[ConsentState],
    ) -> Result<Vec<Arc<dyn NetworkConversation>>, NetworkError>;

    async fn create_dm(
        &self,
        peer_inbox_id: &str,
    ) -> Result<Arc<dyn NetworkConversation>, NetworkError>;

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Arc<dyn NetworkConversation>>, NetworkError>;

    async fn stream_all_messages(
        &self,
    ) -> Result<BoxStream<'static, Result<RawMessage, NetworkError>>, NetworkError>;

    async fn installations(&self) -> Result<Vec<InstallationInfo>, NetworkError>;

    /// Revoke every installation of this identity, including the current one.
    async fn revoke_all_installations(&self) -> Result<usize, NetworkError>;

    async fn close(&self);
}

/// One-to-one channel handle.
#[async_trait]
pub trait NetworkConversation: Send + Sync {
    fn id(&self) -> String;

    fn peer_inbox_id(&self) -> String;

    fn created_at_ms(&self) -> u64;

    async fn consent_state(&self) -> Result<ConsentState, NetworkError>;

    async fn update_consent_state(&self, state: ConsentState) -> Result<(), NetworkError>;

    async fn sync(&self) -> Result<(), NetworkError>;

    async fn is_active(&self) -> Result<bool, NetworkError>;

    async fn message_count(&self) -> Result<usize, NetworkError>;

    async fn messages(&self) -> Result<Vec<RawMessage>, NetworkError>;

    /// Send plain text. Returns the network-assigned message id.
    async fn send_text(&self, text: &str) -> Result<String, NetworkError>;
}

/// Decoded payload of a wire message, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawContent {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Empty,
}

/// A message as the network client hands it over.
///
/// Timestamps come in whichever representation the client produced; at most
/// one is normally set.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_inbox_id: String,
    /// Content type id, e.g. `xmtp.org/text:1.0`.
    pub content_type: String,
    pub content: RawContent,
    /// Plain-text summary supplied by the sender for clients that cannot
    /// decode `content_type`.
    pub fallback: Option<String>,
    pub sent: Option<SystemTime>,
    pub sent_ms: Option<i64>,
    pub sent_ns: Option<i128>,
}

impl RawMessage {
    pub fn text(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_inbox_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_inbox_id: sender_inbox_id.into(),
            content_type: crate::normalize::TEXT_CONTENT_TYPE.to_string(),
            content: RawContent::Text(text.into()),
            fallback: None,
            sent: None,
            sent_ms: None,
            sent_ns: None,
        }
    }

    pub fn with_sent_ns(mut self, sent_ns: i128) -> Self {
        self.sent_ns = Some(sent_ns);
        self
    }
}
