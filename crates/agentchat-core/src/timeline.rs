use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::engine::ChatEvent;
use crate::network::RawMessage;
use crate::normalize::{Message, TimestampSource, normalize};

/// Ordered message list deduplicated by message id.
///
/// Appends keep insertion order; only a network-sync replacement reorders,
/// and it sorts stably by `sent_at_ms`.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Append unless a message with the same id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace the list with the network's copy.
    ///
    /// Locally stamped messages the network has not returned yet are kept so
    /// an optimistic insert does not flicker away before it propagates. So are
    /// messages newer than anything in `synced`: they arrived on the stream
    /// after the network snapshot was taken.
    pub fn replace_from_sync(&mut self, synced: Vec<Message>) {
        let newest = synced.iter().map(|m| m.sent_at_ms).max();
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| {
                m.timestamp_source == TimestampSource::Local
                    || newest.is_none_or(|newest| m.sent_at_ms > newest)
            })
            .collect();
        self.ids.clear();
        for message in synced {
            self.insert(message);
        }
        for message in pending {
            self.insert(message);
        }
        self.messages.sort_by_key(|m| m.sent_at_ms);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}

/// Local view of the active conversation: messages plus the counterparty
/// typing signal.
pub struct Timeline {
    log: MessageLog,
    self_inbox_id: String,
    conversation_id: Option<String>,
    typing_since: Option<Instant>,
    typing_timeout: Duration,
    events: Option<broadcast::Sender<ChatEvent>>,
}

impl Timeline {
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            log: MessageLog::new(),
            self_inbox_id: String::new(),
            conversation_id: None,
            typing_since: None,
            typing_timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Point the timeline at a conversation, clearing state from any other.
    pub fn attach(&mut self, self_inbox_id: &str, conversation_id: &str) {
        if self.conversation_id.as_deref() != Some(conversation_id) {
            self.log.clear();
            self.typing_since = None;
        }
        self.self_inbox_id = self_inbox_id.to_string();
        self.conversation_id = Some(conversation_id.to_string());
    }

    pub fn detach(&mut self) {
        self.log.clear();
        self.conversation_id = None;
        self.self_inbox_id.clear();
        self.set_typing(None);
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Apply a message from the live stream. Returns the appended message.
    pub fn apply_inbound(&mut self, raw: &RawMessage) -> Option<Message> {
        if self.conversation_id.as_deref() != Some(raw.conversation_id.as_str()) {
            return None;
        }
        if self.log.contains(&raw.id) {
            tracing::trace!(message_id = %raw.id, "duplicate message ignored");
            return None;
        }
        let message = normalize(raw)?;
        let from_counterparty = message.sender_inbox_id != self.self_inbox_id;
        self.log.insert(message.clone());
        self.emit(ChatEvent::MessageAdded(message.clone()));
        if from_counterparty {
            self.set_typing(None);
        }
        Some(message)
    }

    /// Optimistically reflect a message this device sent.
    pub fn apply_outbound(&mut self, message: Message) -> bool {
        let added = self.log.insert(message.clone());
        if added {
            self.emit(ChatEvent::MessageAdded(message));
        }
        added
    }

    /// Replace the list from a full conversation load.
    pub fn replace_from_sync(&mut self, raw: &[RawMessage]) {
        let synced: Vec<Message> = raw.iter().filter_map(normalize).collect();
        let had_reply = synced
            .iter()
            .filter(|m| !self.log.contains(&m.id))
            .any(|m| m.sender_inbox_id != self.self_inbox_id);
        self.log.replace_from_sync(synced);
        let replied_last = self
            .log
            .messages()
            .last()
            .is_some_and(|m| m.sender_inbox_id != self.self_inbox_id);
        if had_reply || replied_last {
            self.set_typing(None);
        }
        self.emit(ChatEvent::StateChanged);
    }

    /// The counterparty is expected to reply.
    pub fn mark_awaiting_reply(&mut self) {
        self.set_typing(Some(Instant::now()));
    }

    /// Drop the typing signal, e.g. when the send that raised it failed.
    pub fn clear_awaiting_reply(&mut self) {
        self.set_typing(None);
    }

    pub fn is_counterparty_typing(&mut self) -> bool {
        match self.typing_since {
            Some(since) if since.elapsed() >= self.typing_timeout => {
                tracing::debug!("typing indicator expired");
                self.set_typing(None);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn set_typing(&mut self, since: Option<Instant>) {
        let was = self.typing_since.is_some();
        self.typing_since = since;
        if was != since.is_some() {
            self.emit(ChatEvent::TypingChanged(since.is_some()));
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MessageKind;

    fn raw(id: &str, sender: &str, ms: i64) -> RawMessage {
        let mut m = RawMessage::text(id, "conv", sender, format!("body {id}"));
        m.sent_ms = Some(ms);
        m
    }

    fn timeline() -> Timeline {
        let mut t = Timeline::new(Duration::from_secs(30));
        t.attach("me", "conv");
        t
    }

    #[test]
    fn same_id_from_load_and_stream_appears_once() {
        let mut t = timeline();
        t.replace_from_sync(&[raw("a", "agent", 1), raw("b", "me", 2)]);
        assert!(t.apply_inbound(&raw("b", "me", 2)).is_none());
        assert!(t.apply_inbound(&raw("c", "agent", 3)).is_some());
        assert!(t.apply_inbound(&raw("c", "agent", 3)).is_none());
        let ids: Vec<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn other_conversations_are_ignored() {
        let mut t = timeline();
        let mut foreign = raw("x", "agent", 1);
        foreign.conversation_id = "elsewhere".into();
        assert!(t.apply_inbound(&foreign).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn sync_sorts_by_timestamp_and_keeps_pending() {
        let mut t = timeline();
        t.apply_outbound(Message::outbound("local", "hello", "me", 50));
        t.replace_from_sync(&[raw("late", "agent", 100), raw("early", "agent", 10)]);
        let ids: Vec<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["early", "local", "late"]);

        let mut confirmed = raw("local", "me", 50);
        confirmed.content = crate::network::RawContent::Text("hello".into());
        t.replace_from_sync(&[raw("early", "agent", 10), confirmed, raw("late", "agent", 100)]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.messages()[1].timestamp_source, TimestampSource::Millis);
    }

    #[test]
    fn sync_keeps_messages_streamed_after_the_snapshot() {
        let mut t = timeline();
        // streamed while the load was in flight
        t.apply_inbound(&raw("fresh", "agent", 200));
        t.apply_inbound(&raw("gone", "agent", 5));
        t.replace_from_sync(&[raw("a", "agent", 10), raw("b", "me", 20)]);
        let ids: Vec<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "fresh"]);
    }

    #[test]
    fn sync_ending_with_a_reply_clears_typing() {
        let mut t = timeline();
        t.apply_inbound(&raw("reply", "agent", 20));
        t.mark_awaiting_reply();
        t.replace_from_sync(&[raw("ask", "me", 10), raw("reply", "agent", 20)]);
        assert!(!t.is_counterparty_typing());

        t.mark_awaiting_reply();
        t.replace_from_sync(&[raw("reply", "agent", 20), raw("again", "me", 30)]);
        assert!(t.is_counterparty_typing());
    }

    #[test]
    fn outbound_dedups_against_stream() {
        let mut t = timeline();
        assert!(t.apply_inbound(&raw("m", "me", 5)).is_some());
        assert!(!t.apply_outbound(Message::outbound("m", "body m", "me", 5)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].kind, MessageKind::Text);
    }

    #[test]
    fn counterparty_message_clears_typing() {
        let mut t = timeline();
        t.mark_awaiting_reply();
        assert!(t.is_counterparty_typing());
        t.apply_inbound(&raw("own", "me", 1));
        assert!(t.is_counterparty_typing());
        t.apply_inbound(&raw("reply", "agent", 2));
        assert!(!t.is_counterparty_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_expires() {
        let mut t = timeline();
        t.mark_awaiting_reply();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(t.is_counterparty_typing());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!t.is_counterparty_typing());
    }

    #[test]
    fn events_are_published() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut t = Timeline::new(Duration::from_secs(30)).with_events(tx);
        t.attach("me", "conv");
        t.mark_awaiting_reply();
        t.apply_inbound(&raw("r", "agent", 1));
        assert!(matches!(rx.try_recv(), Ok(ChatEvent::TypingChanged(true))));
        assert!(matches!(rx.try_recv(), Ok(ChatEvent::MessageAdded(m)) if m.id == "r"));
        assert!(matches!(rx.try_recv(), Ok(ChatEvent::TypingChanged(false))));
    }
}
