use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{ChatError, ChatResult};
use crate::network::NetworkConversation;
use crate::normalize::Message;
use crate::time::now_ms;
use crate::timeline::Timeline;

/// Sends text on the active conversation and keeps a single follow-up
/// re-sync scheduled to pick up the counterparty's reply.
pub struct OutboundSender {
    timeline: Arc<Mutex<Timeline>>,
    resync_delay: Duration,
    resync: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl OutboundSender {
    pub fn new(timeline: Arc<Mutex<Timeline>>, resync_delay: Duration) -> Self {
        Self {
            timeline,
            resync_delay,
            resync: std::sync::Mutex::new(None),
        }
    }

    /// Re-sync, check liveness, send, then insert the optimistic copy.
    pub async fn send(
        &self,
        conversation: Arc<dyn NetworkConversation>,
        self_inbox_id: &str,
        text: &str,
    ) -> ChatResult<Message> {
        let conversation_id = conversation.id();
        conversation.sync().await?;
        if !conversation.is_active().await? {
            tracing::warn!(%conversation_id, "refusing to send on inactive conversation");
            return Err(ChatError::ConversationInactive { conversation_id });
        }

        // Raised before sending: the reply can reach the stream before
        // send_text returns.
        self.timeline.lock().await.mark_awaiting_reply();
        let message_id = match conversation.send_text(text).await {
            Ok(id) => id,
            Err(e) => {
                self.timeline.lock().await.clear_awaiting_reply();
                return Err(e.into());
            }
        };
        tracing::info!(%conversation_id, %message_id, "message sent");

        let message = Message::outbound(message_id, text, self_inbox_id, now_ms());
        self.timeline.lock().await.apply_outbound(message.clone());
        self.schedule_resync(conversation);
        Ok(message)
    }

    fn schedule_resync(&self, conversation: Arc<dyn NetworkConversation>) {
        let timeline = self.timeline.clone();
        let delay = self.resync_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = resync(conversation.as_ref(), &timeline).await {
                tracing::warn!(err = %e, "post-send re-sync failed");
            }
        });
        let mut slot = self.resync.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    pub fn has_pending_resync(&self) -> bool {
        self.resync
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Cancel the pending re-sync, if any.
    pub fn cancel(&self) {
        if let Some(task) = self.resync.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for OutboundSender {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn resync(conversation: &dyn NetworkConversation, timeline: &Mutex<Timeline>) -> ChatResult<()> {
    conversation.sync().await?;
    let raw = conversation.messages().await?;
    let mut timeline = timeline.lock().await;
    if timeline.conversation_id() == Some(conversation.id().as_str()) {
        timeline.replace_from_sync(&raw);
        tracing::debug!(messages = timeline.len(), "post-send re-sync applied");
    }
    Ok(())
}
