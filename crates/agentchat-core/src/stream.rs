use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::error::{ChatError, NetworkError};
use crate::network::{NetworkSession, RawMessage};
use crate::timeline::Timeline;

type MessageStream = BoxStream<'static, Result<RawMessage, NetworkError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Subscribing,
    Streaming,
    Error,
}

/// Live message subscription feeding the timeline.
///
/// At most one subscription task runs at a time. Item errors are logged and
/// skipped; a failed or ended subscription goes back to `Idle` and, when a
/// retry delay is configured, resubscribes from the same task.
pub struct StreamListener {
    state: watch::Sender<StreamState>,
    task: Option<JoinHandle<()>>,
    retry_delay: Option<Duration>,
}

impl StreamListener {
    pub fn new(retry_delay: Option<Duration>) -> Self {
        let (state, _) = watch::channel(StreamState::Idle);
        Self {
            state,
            task: None,
            retry_delay,
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Subscribe, then pump the stream from a background task. The
    /// subscription exists once this returns, so nothing published after it
    /// is missed. Returns `false` when one is already running.
    pub async fn start(
        &mut self,
        session: Arc<dyn NetworkSession>,
        timeline: Arc<Mutex<Timeline>>,
    ) -> bool {
        if self.is_running() {
            tracing::debug!("message stream already running");
            return false;
        }
        let first = subscribe(session.as_ref(), &self.state).await;
        let state = self.state.clone();
        let retry_delay = self.retry_delay;
        self.task = Some(tokio::spawn(async move {
            let mut next = first;
            loop {
                if let Some(stream) = next.take() {
                    pump(stream, &timeline).await;
                }
                let _ = state.send(StreamState::Idle);
                match retry_delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break,
                }
                next = subscribe(session.as_ref(), &state).await;
            }
        }));
        true
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("message stream stopped");
        }
        let _ = self.state.send(StreamState::Idle);
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn subscribe(
    session: &dyn NetworkSession,
    state: &watch::Sender<StreamState>,
) -> Option<MessageStream> {
    let _ = state.send(StreamState::Subscribing);
    match session.stream_all_messages().await {
        Ok(stream) => {
            let _ = state.send(StreamState::Streaming);
            tracing::info!("message stream started");
            Some(stream)
        }
        Err(e) => {
            let err = ChatError::Stream(e);
            tracing::warn!(err = %err, "message stream subscription failed");
            let _ = state.send(StreamState::Error);
            None
        }
    }
}

async fn pump(mut stream: MessageStream, timeline: &Mutex<Timeline>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(raw) => {
                let added = timeline.lock().await.apply_inbound(&raw);
                if let Some(message) = added {
                    tracing::debug!(message_id = %message.id, "streamed message appended");
                }
            }
            Err(e) => {
                let err = ChatError::Stream(e);
                tracing::warn!(err = %err, "skipping stream item");
            }
        }
    }
    tracing::info!("message stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConsentState, InstallationInfo, NetworkConversation};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a fixed batch of items per subscription.
    struct ScriptedSession {
        subscriptions: AtomicUsize,
        items: Vec<Result<RawMessage, NetworkError>>,
    }

    #[async_trait]
    impl NetworkSession for ScriptedSession {
        fn inbox_id(&self) -> String {
            "me".into()
        }
        fn installation_id(&self) -> String {
            "inst".into()
        }
        async fn sync_all(&self, _consent: &[ConsentState]) -> Result<(), NetworkError> {
            Ok(())
        }
        async fn list_dms(
            &self,
            _consent: &[ConsentState],
        ) -> Result<Vec<Arc<dyn NetworkConversation>>, NetworkError> {
            Ok(Vec::new())
        }
        async fn create_dm(&self, _peer: &str) -> Result<Arc<dyn NetworkConversation>, NetworkError> {
            Err(NetworkError::from_message("unsupported"))
        }
        async fn get_conversation(
            &self,
            _id: &str,
        ) -> Result<Option<Arc<dyn NetworkConversation>>, NetworkError> {
            Ok(None)
        }
        async fn stream_all_messages(
            &self,
        ) -> Result<BoxStream<'static, Result<RawMessage, NetworkError>>, NetworkError> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            Ok(futures_util::stream::iter(self.items.clone()).boxed())
        }
        async fn installations(&self) -> Result<Vec<InstallationInfo>, NetworkError> {
            Ok(Vec::new())
        }
        async fn revoke_all_installations(&self) -> Result<usize, NetworkError> {
            Ok(0)
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn errors_are_skipped_and_duplicates_dropped() {
        let msg = RawMessage::text("m1", "conv", "agent", "hi").with_sent_ns(1_000_000);
        let session = Arc::new(ScriptedSession {
            subscriptions: AtomicUsize::new(0),
            items: vec![
                Ok(msg.clone()),
                Err(NetworkError::from_message("decode failed")),
                Ok(msg),
                Ok(RawMessage::text("m2", "conv", "agent", "again").with_sent_ns(2_000_000)),
            ],
        });
        let mut tl = Timeline::new(Duration::from_secs(30));
        tl.attach("me", "conv");
        let timeline = Arc::new(Mutex::new(tl));

        let mut listener = StreamListener::new(None);
        assert!(listener.start(session.clone(), timeline.clone()).await);
        // subscribed before the pump task has run
        assert_eq!(session.subscriptions.load(Ordering::SeqCst), 1);
        while listener.is_running() {
            tokio::task::yield_now().await;
        }

        assert_eq!(listener.state(), StreamState::Idle);
        let ids: Vec<String> = timeline.lock().await.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["m1", "m2"]);
        assert_eq!(session.subscriptions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_a_no_op_while_running() {
        let session = Arc::new(ScriptedSession {
            subscriptions: AtomicUsize::new(0),
            items: Vec::new(),
        });
        let timeline = Arc::new(Mutex::new(Timeline::new(Duration::from_secs(30))));
        let mut listener = StreamListener::new(Some(Duration::from_secs(60)));
        assert!(listener.start(session.clone(), timeline.clone()).await);
        assert!(!listener.start(session.clone(), timeline.clone()).await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.subscriptions.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.subscriptions.load(Ordering::SeqCst), 2);

        listener.stop();
        assert_eq!(listener.state(), StreamState::Idle);
    }
}
