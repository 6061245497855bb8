use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use crate::collab::{
    ProfileResolver, SubmitError, TransactionReceipt, TransactionSubmitter, display_name,
    short_address,
};
use crate::config::ChatConfig;
use crate::conversation::{ActiveConversation, ConversationReconciler, peer_matches};
use crate::diagnostics::{self, Diagnostics, InstallationStatus};
use crate::error::{ChatError, ChatResult};
use crate::installation::{InstallationKeyStore, KeyValueStore};
use crate::latch::Latch;
use crate::network::MessagingNetwork;
use crate::normalize::{Message, MessageKind};
use crate::outbound::OutboundSender;
use crate::session::{Identity, Session, SessionEstablisher};
use crate::stream::{StreamListener, StreamState};
use crate::timeline::Timeline;
use crate::wallet::{BoundWallet, WalletBinder, WalletSource};

/// Notifications for a UI collaborator.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    StateChanged,
    MessageAdded(Message),
    TypingChanged(bool),
    Error(String),
}

/// Snapshot of what a UI renders.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub is_counterparty_typing: bool,
}

struct Connection {
    session: Session,
    /// Inbox id of the agent this connection talks to.
    agent_inbox_id: String,
    conversation: ActiveConversation,
    stream: StreamListener,
    outbound: Arc<OutboundSender>,
}

#[derive(Default)]
struct EngineInner {
    connecting: bool,
    error: Option<String>,
    wallet: Option<BoundWallet>,
    connection: Option<Connection>,
}

/// Owns the session and the conversation with the configured agent.
pub struct ChatEngine {
    config: ChatConfig,
    network: Arc<dyn MessagingNetwork>,
    wallets: Arc<dyn WalletSource>,
    keys: InstallationKeyStore,
    binder: WalletBinder,
    establisher: SessionEstablisher,
    submitter: Option<Arc<dyn TransactionSubmitter>>,
    profiles: Option<Arc<dyn ProfileResolver>>,
    inner: Mutex<EngineInner>,
    timeline: Arc<Mutex<Timeline>>,
    refresh_latch: Latch,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatEngine {
    pub fn new(
        config: ChatConfig,
        network: Arc<dyn MessagingNetwork>,
        wallets: Arc<dyn WalletSource>,
        key_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let keys = InstallationKeyStore::new(key_store);
        let timeline = Timeline::new(config.typing_timeout()).with_events(events.clone());
        Self {
            binder: WalletBinder::new(config.wallet_retry()),
            establisher: SessionEstablisher::new(network.clone(), keys.clone(), config.env),
            config,
            network,
            wallets,
            keys,
            submitter: None,
            profiles: None,
            inner: Mutex::new(EngineInner::default()),
            timeline: Arc::new(Mutex::new(timeline)),
            refresh_latch: Latch::new(),
            events,
        }
    }

    pub fn with_transaction_submitter(mut self, submitter: Arc<dyn TransactionSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_profile_resolver(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub async fn state(&self) -> ChatState {
        let inner = self.inner.lock().await;
        let mut timeline = self.timeline.lock().await;
        ChatState {
            is_connected: inner.connection.is_some(),
            is_connecting: inner.connecting,
            error: inner.error.clone(),
            messages: timeline.messages().to_vec(),
            is_counterparty_typing: timeline.is_counterparty_typing(),
        }
    }

    pub async fn identity(&self) -> Option<Identity> {
        let inner = self.inner.lock().await;
        inner.connection.as_ref().map(|c| c.session.identity().clone())
    }

    /// Inbox id of the agent the current connection talks to.
    pub async fn agent_inbox_id(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.connection.as_ref().map(|c| c.agent_inbox_id.clone())
    }

    /// Profile name for a wallet address, else its shortened form.
    pub async fn display_name(&self, address: &str) -> String {
        match &self.profiles {
            Some(profiles) => display_name(profiles.as_ref(), address).await,
            None => short_address(address),
        }
    }

    pub async fn stream_state(&self) -> StreamState {
        let inner = self.inner.lock().await;
        inner
            .connection
            .as_ref()
            .map_or(StreamState::Idle, |c| c.stream.state())
    }

    /// Bind a wallet, establish the session, reconcile the conversation, load
    /// its messages and start streaming. Failures land in `state().error`.
    pub async fn connect(&self) -> ChatResult<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.connection.is_some() || inner.connecting {
                tracing::debug!("connect ignored, already connected or connecting");
                return Ok(());
            }
            inner.connecting = true;
            inner.error = None;
        }
        self.emit(ChatEvent::StateChanged);

        let result = self.open_connection().await;

        let outcome = {
            let mut inner = self.inner.lock().await;
            inner.connecting = false;
            match result {
                Ok(Some(connection)) => {
                    tracing::info!(
                        conversation_id = %connection.conversation.id(),
                        "connected"
                    );
                    inner.connection = Some(connection);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    let message = e.user_message();
                    tracing::warn!(err = %e, "connect failed");
                    inner.error = Some(message.clone());
                    self.emit(ChatEvent::Error(message));
                    Err(e)
                }
            }
        };
        self.emit(ChatEvent::StateChanged);
        outcome
    }

    async fn open_connection(&self) -> ChatResult<Option<Connection>> {
        let wallet = self.binder.bind(self.wallets.as_ref()).await?;
        self.inner.lock().await.wallet = Some(wallet.clone());
        let agent_inbox_id = self.resolve_agent().await?;

        let Some(mut session) = self.establisher.establish(&wallet).await? else {
            return Ok(None);
        };
        match self.open_conversation(&session, &agent_inbox_id).await {
            Ok((conversation, stream)) => {
                let outbound = Arc::new(OutboundSender::new(
                    self.timeline.clone(),
                    self.config.resync_delay(),
                ));
                Ok(Some(Connection {
                    session,
                    agent_inbox_id,
                    conversation,
                    stream,
                    outbound,
                }))
            }
            Err(e) => {
                session.dispose().await;
                self.timeline.lock().await.detach();
                Err(e)
            }
        }
    }

    /// The configured agent inbox id, or the inbox registered for the
    /// agent's wallet address.
    async fn resolve_agent(&self) -> ChatResult<String> {
        let configured = self.config.agent_address.trim();
        if !configured.is_empty() {
            return Ok(configured.to_string());
        }
        let wallet = self.config.agent_wallet_address.trim().to_lowercase();
        if wallet.is_empty() {
            return Err(ChatError::AgentNotConfigured);
        }
        match self.network.inbox_id_for_identifier(&wallet).await? {
            Some(inbox_id) => {
                tracing::info!(agent_wallet = %wallet, %inbox_id, "resolved agent inbox");
                Ok(inbox_id)
            }
            None => Err(ChatError::AgentUnresolved { address: wallet }),
        }
    }

    fn reconciler(&self, session: &Session, agent_inbox_id: &str) -> ConversationReconciler {
        ConversationReconciler::new(session.handle(), agent_inbox_id.to_string())
    }

    /// Reconcile the conversation, subscribe to the stream, then load. The
    /// load and the stream overlap; dedup by id absorbs it.
    async fn open_conversation(
        &self,
        session: &Session,
        agent_inbox_id: &str,
    ) -> ChatResult<(ActiveConversation, StreamListener)> {
        let conversation = self.reconciler(session, agent_inbox_id).find_or_create().await?;
        self.timeline
            .lock()
            .await
            .attach(&session.identity().inbox_id, conversation.id());
        let mut stream = StreamListener::new(self.config.stream_retry());
        stream.start(session.handle(), self.timeline.clone()).await;
        if let Err(e) = self.load_messages(&conversation).await {
            stream.stop();
            return Err(e);
        }
        Ok((conversation, stream))
    }

    async fn load_messages(&self, conversation: &ActiveConversation) -> ChatResult<()> {
        let raw = conversation.handle.messages().await?;
        let mut timeline = self.timeline.lock().await;
        if timeline.conversation_id() == Some(conversation.id()) {
            timeline.replace_from_sync(&raw);
            tracing::debug!(conversation_id = %conversation.id(), messages = timeline.len(), "messages loaded");
        }
        Ok(())
    }

    async fn active_conversation(&self) -> ChatResult<ActiveConversation> {
        let inner = self.inner.lock().await;
        let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
        Ok(connection.conversation.clone())
    }

    pub async fn send_message(&self, text: &str) -> ChatResult<Message> {
        let (conversation, inbox_id, outbound) = {
            let inner = self.inner.lock().await;
            let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
            (
                connection.conversation.handle.clone(),
                connection.session.identity().inbox_id.clone(),
                connection.outbound.clone(),
            )
        };
        outbound.send(conversation, &inbox_id, text).await
    }

    /// Re-sync the active conversation and reload its messages. Returns
    /// `false` when a refresh was already in flight.
    pub async fn refresh_messages(&self) -> ChatResult<bool> {
        let Some(_guard) = self.refresh_latch.try_acquire() else {
            tracing::debug!("refresh already in flight");
            return Ok(false);
        };
        let conversation = self.active_conversation().await?;
        conversation.handle.sync().await?;
        self.load_messages(&conversation).await?;
        Ok(true)
    }

    /// Network-wide sync across all consent states, then re-resolve the
    /// active conversation and reload.
    pub async fn force_full_sync(&self) -> ChatResult<bool> {
        let Some(_guard) = self.refresh_latch.try_acquire() else {
            tracing::debug!("sync already in flight");
            return Ok(false);
        };
        let (reconciler, current) = {
            let inner = self.inner.lock().await;
            let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
            (
                self.reconciler(&connection.session, &connection.agent_inbox_id),
                connection.conversation.clone(),
            )
        };
        reconciler.sync().await?;
        let refreshed = reconciler.refresh_after_external_sync(&current).await?;
        self.switch_conversation(refreshed).await?;
        Ok(true)
    }

    /// Re-run reconciliation when the active conversation is not with the
    /// expected agent. Returns whether the conversation changed.
    pub async fn repair_conversation(&self) -> ChatResult<bool> {
        let (reconciler, current) = {
            let inner = self.inner.lock().await;
            let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
            (
                self.reconciler(&connection.session, &connection.agent_inbox_id),
                connection.conversation.clone(),
            )
        };
        if peer_matches(&current.summary.peer_inbox_id, reconciler.counterparty()) {
            tracing::info!(conversation_id = %current.id(), "conversation peer already matches");
            return Ok(false);
        }
        tracing::warn!(
            conversation_id = %current.id(),
            peer = %current.summary.peer_inbox_id,
            expected = %reconciler.counterparty(),
            "active conversation has the wrong peer, repairing"
        );
        let repaired = reconciler.find_or_create().await?;
        let changed = repaired.id() != current.id();
        self.switch_conversation(repaired).await?;
        Ok(changed)
    }

    async fn switch_conversation(&self, conversation: ActiveConversation) -> ChatResult<()> {
        {
            let mut inner = self.inner.lock().await;
            let connection = inner.connection.as_mut().ok_or(ChatError::NotConnected)?;
            self.timeline
                .lock()
                .await
                .attach(&connection.session.identity().inbox_id, conversation.id());
            connection.conversation = conversation.clone();
        }
        self.load_messages(&conversation).await
    }

    async fn bound_wallet(&self) -> ChatResult<BoundWallet> {
        if let Some(wallet) = self.inner.lock().await.wallet.clone() {
            return Ok(wallet);
        }
        let wallet = self.binder.bind(self.wallets.as_ref()).await?;
        self.inner.lock().await.wallet = Some(wallet.clone());
        Ok(wallet)
    }

    /// Revoke every installation of the identity and clear the local
    /// credential. Works without a session when the quota blocks one.
    pub async fn revoke_all_installations(&self) -> ChatResult<usize> {
        let session = {
            let inner = self.inner.lock().await;
            inner.connection.as_ref().map(|c| c.session.handle())
        };
        let wallet = self.bound_wallet().await?;
        let revoked = match session {
            Some(session) => {
                let revoked = session.revoke_all_installations().await?;
                tracing::info!(address = %wallet.address, revoked, "revoked installations");
                revoked
            }
            None => self.establisher.revoke_without_session(&wallet).await?,
        };
        // The current installation is gone too; the session is unusable.
        self.teardown(false).await;
        self.keys.clear(&wallet.address)?;
        Ok(revoked)
    }

    /// Remove the persisted installation credential for the bound wallet.
    pub async fn clear_local_installation_key(&self) -> ChatResult<bool> {
        let wallet = self.bound_wallet().await?;
        Ok(self.keys.clear(&wallet.address)?)
    }

    pub async fn installation_count(&self) -> ChatResult<InstallationStatus> {
        let session = {
            let inner = self.inner.lock().await;
            let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
            connection.session.handle()
        };
        let installations = session.installations().await?;
        Ok(InstallationStatus {
            count: installations.len(),
            quota: self.config.installation_quota,
        })
    }

    pub async fn diagnostics(&self) -> ChatResult<Diagnostics> {
        let (session, agent_inbox_id, conversation) = {
            let inner = self.inner.lock().await;
            let connection = inner.connection.as_ref().ok_or(ChatError::NotConnected)?;
            (
                connection.session.handle(),
                connection.agent_inbox_id.clone(),
                connection.conversation.clone(),
            )
        };
        diagnostics::collect(
            session.as_ref(),
            &agent_inbox_id,
            Some(&conversation),
            self.config.installation_quota,
        )
        .await
    }

    /// Hand a transaction-request message to the transaction submitter.
    pub async fn execute_transaction(&self, message_id: &str) -> ChatResult<TransactionReceipt> {
        let payload = {
            let timeline = self.timeline.lock().await;
            timeline
                .messages()
                .iter()
                .find(|m| m.id == message_id && m.kind == MessageKind::TransactionRequest)
                .and_then(|m| m.transaction.clone())
                .ok_or_else(|| ChatError::NotATransaction(message_id.to_string()))?
        };
        let submitter = self.submitter.as_ref().ok_or(SubmitError::Unavailable)?;
        let receipt = submitter.submit(&payload).await?;
        tracing::info!(%message_id, txs = receipt.tx_hashes.len(), "transaction request executed");
        Ok(receipt)
    }

    /// Log out: cancel timers, stop the stream, dispose the session and
    /// reset state.
    pub async fn disconnect(&self) {
        self.teardown(true).await;
    }

    async fn teardown(&self, forget_wallet: bool) {
        let connection = {
            let mut inner = self.inner.lock().await;
            inner.error = None;
            if forget_wallet {
                inner.wallet = None;
            }
            inner.connection.take()
        };
        if let Some(mut connection) = connection {
            connection.outbound.cancel();
            connection.stream.stop();
            connection.session.dispose().await;
        }
        self.timeline.lock().await.detach();
        self.emit(ChatEvent::StateChanged);
    }
}
