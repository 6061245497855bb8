//! Read-only introspection for operational tooling.

use serde::Serialize;

use crate::conversation::{ActiveConversation, ConversationSummary, peer_matches};
use crate::error::ChatResult;
use crate::network::{ALL_CONSENT_STATES, ConsentState, NetworkSession};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationDiagnostic {
    pub id: String,
    pub peer_inbox_id: String,
    pub consent: ConsentState,
    pub message_count: usize,
    /// Peer is the expected counterparty.
    pub is_target: bool,
    /// This is the conversation the engine currently uses.
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstallationStatus {
    pub count: usize,
    pub quota: usize,
}

impl InstallationStatus {
    pub fn is_exhausted(&self) -> bool {
        self.count >= self.quota
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub session_identifier: String,
    pub installation_id: String,
    pub active_conversation_id: Option<String>,
    pub active_conversation_peer_id: Option<String>,
    pub expected_peer_id: String,
    pub peer_matches: bool,
    pub all_conversations: Vec<ConversationDiagnostic>,
    /// Target conversations whose consent is not `allowed`.
    pub consent_mismatches: Vec<String>,
    pub duplicate_target_conversations: usize,
    pub installations: Option<InstallationStatus>,
}

/// Assemble a snapshot from already-fetched data.
pub fn build(
    session_identifier: &str,
    installation_id: &str,
    expected_peer_id: &str,
    active: Option<&ConversationSummary>,
    conversations: &[ConversationSummary],
    installations: Option<InstallationStatus>,
) -> Diagnostics {
    let all_conversations: Vec<ConversationDiagnostic> = conversations
        .iter()
        .map(|c| ConversationDiagnostic {
            id: c.id.clone(),
            peer_inbox_id: c.peer_inbox_id.clone(),
            consent: c.consent,
            message_count: c.message_count,
            is_target: peer_matches(&c.peer_inbox_id, expected_peer_id),
            is_active: active.is_some_and(|a| a.id == c.id),
        })
        .collect();
    let consent_mismatches = all_conversations
        .iter()
        .filter(|c| c.is_target && c.consent != ConsentState::Allowed)
        .map(|c| c.id.clone())
        .collect();
    let targets = all_conversations.iter().filter(|c| c.is_target).count();

    Diagnostics {
        session_identifier: session_identifier.to_string(),
        installation_id: installation_id.to_string(),
        active_conversation_id: active.map(|a| a.id.clone()),
        active_conversation_peer_id: active.map(|a| a.peer_inbox_id.clone()),
        expected_peer_id: expected_peer_id.to_string(),
        peer_matches: active.is_some_and(|a| peer_matches(&a.peer_inbox_id, expected_peer_id)),
        all_conversations,
        consent_mismatches,
        duplicate_target_conversations: targets.saturating_sub(1),
        installations,
    }
}

/// Query the session and build a snapshot. Never mutates engine state.
pub async fn collect(
    session: &dyn NetworkSession,
    expected_peer_id: &str,
    active: Option<&ActiveConversation>,
    installation_quota: usize,
) -> ChatResult<Diagnostics> {
    let handles = session.list_dms(&ALL_CONSENT_STATES).await?;
    let mut conversations = Vec::with_capacity(handles.len());
    for handle in &handles {
        conversations.push(ConversationSummary::of(handle.as_ref()).await?);
    }
    let installations = match session.installations().await {
        Ok(list) => Some(InstallationStatus {
            count: list.len(),
            quota: installation_quota,
        }),
        Err(e) => {
            tracing::warn!(err = %e, "could not fetch installations for diagnostics");
            None
        }
    };
    Ok(build(
        &session.inbox_id(),
        &session.installation_id(),
        expected_peer_id,
        active.map(|a| &a.summary),
        &conversations,
        installations,
    ))
}
