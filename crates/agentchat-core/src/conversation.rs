use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{ChatResult, NetworkError};
use crate::network::{ALL_CONSENT_STATES, ConsentState, NetworkConversation, NetworkSession};

/// Snapshot of a one-to-one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub peer_inbox_id: String,
    pub created_at_ms: u64,
    pub consent: ConsentState,
    pub message_count: usize,
}

impl ConversationSummary {
    pub async fn of(handle: &dyn NetworkConversation) -> Result<Self, NetworkError> {
        Ok(Self {
            id: handle.id(),
            peer_inbox_id: handle.peer_inbox_id(),
            created_at_ms: handle.created_at_ms(),
            consent: handle.consent_state().await?,
            message_count: handle.message_count().await?,
        })
    }
}

/// The conversation selected for the counterparty, with its live handle.
#[derive(Clone)]
pub struct ActiveConversation {
    pub summary: ConversationSummary,
    pub handle: Arc<dyn NetworkConversation>,
}

impl fmt::Debug for ActiveConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActiveConversation")
            .field(&self.summary)
            .finish()
    }
}

impl ActiveConversation {
    pub fn id(&self) -> &str {
        &self.summary.id
    }
}

/// Canonical ordering among duplicates: most messages first, then oldest,
/// then by id. Best effort only; the network gives no stronger guarantee.
fn canonical_order(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    b.message_count
        .cmp(&a.message_count)
        .then(a.created_at_ms.cmp(&b.created_at_ms))
        .then_with(|| a.id.cmp(&b.id))
}

/// Index of the conversation to use among duplicates.
pub fn select_canonical(candidates: &[ConversationSummary]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| canonical_order(a, b))
        .map(|(i, _)| i)
}

pub fn peer_matches(peer: &str, counterparty: &str) -> bool {
    peer.eq_ignore_ascii_case(counterparty)
}

/// Finds, deduplicates and creates the conversation with one counterparty.
pub struct ConversationReconciler {
    session: Arc<dyn NetworkSession>,
    counterparty: String,
}

impl ConversationReconciler {
    pub fn new(session: Arc<dyn NetworkSession>, counterparty: impl Into<String>) -> Self {
        Self {
            session,
            counterparty: counterparty.into(),
        }
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    /// Pull every channel visible to the session, across all consent states.
    pub async fn sync(&self) -> ChatResult<()> {
        self.session.sync_all(&ALL_CONSENT_STATES).await?;
        Ok(())
    }

    pub async fn list_all(&self) -> ChatResult<Vec<ActiveConversation>> {
        let handles = self.session.list_dms(&ALL_CONSENT_STATES).await?;
        let mut all = Vec::with_capacity(handles.len());
        for handle in handles {
            let summary = ConversationSummary::of(handle.as_ref()).await?;
            all.push(ActiveConversation { summary, handle });
        }
        Ok(all)
    }

    /// Channels whose peer is the counterparty.
    pub async fn candidates(&self) -> ChatResult<Vec<ActiveConversation>> {
        let mut all = self.list_all().await?;
        all.retain(|c| peer_matches(&c.summary.peer_inbox_id, &self.counterparty));
        Ok(all)
    }

    pub async fn find_or_create(&self) -> ChatResult<ActiveConversation> {
        self.sync().await?;
        let mut candidates = self.candidates().await?;

        if candidates.is_empty() {
            tracing::info!(counterparty = %self.counterparty, "no conversation found, creating one");
            let created = self.session.create_dm(&self.counterparty).await?;
            self.sync().await?;
            candidates = self.candidates().await?;
            if candidates.is_empty() {
                tracing::warn!(
                    conversation_id = %created.id(),
                    "created conversation not listed after sync, using creation handle"
                );
                let summary = ConversationSummary::of(created.as_ref()).await?;
                candidates.push(ActiveConversation {
                    summary,
                    handle: created,
                });
            }
        }

        if candidates.len() > 1 {
            tracing::warn!(
                counterparty = %self.counterparty,
                duplicates = candidates.len(),
                "multiple conversations with counterparty"
            );
        }

        let summaries: Vec<ConversationSummary> =
            candidates.iter().map(|c| c.summary.clone()).collect();
        let index = select_canonical(&summaries).unwrap_or(0);
        let mut selected = candidates.swap_remove(index);
        tracing::info!(
            conversation_id = %selected.summary.id,
            messages = selected.summary.message_count,
            "selected conversation"
        );
        self.ensure_allowed(&mut selected).await?;
        Ok(selected)
    }

    /// Upgrade consent on a conversation the user is actively using.
    async fn ensure_allowed(&self, conversation: &mut ActiveConversation) -> ChatResult<()> {
        if conversation.summary.consent != ConsentState::Allowed {
            tracing::info!(
                conversation_id = %conversation.summary.id,
                from = %conversation.summary.consent,
                "upgrading conversation consent to allowed"
            );
            conversation
                .handle
                .update_consent_state(ConsentState::Allowed)
                .await?;
            conversation.summary.consent = ConsentState::Allowed;
        }
        Ok(())
    }

    /// Re-resolve the active conversation after a network-wide sync, which
    /// can invalidate previously held handles.
    pub async fn refresh_after_external_sync(
        &self,
        current: &ActiveConversation,
    ) -> ChatResult<ActiveConversation> {
        match self.session.get_conversation(current.id()).await? {
            Some(handle) => {
                let summary = ConversationSummary::of(handle.as_ref()).await?;
                let mut refreshed = ActiveConversation { summary, handle };
                self.ensure_allowed(&mut refreshed).await?;
                Ok(refreshed)
            }
            None => {
                tracing::warn!(
                    conversation_id = %current.id(),
                    "active conversation vanished after sync, reconciling"
                );
                self.find_or_create().await
            }
        }
    }
}
