use agentchat_core::config::DEFAULT_INSTALLATION_QUOTA;
use agentchat_core::error::{NetworkError, NetworkErrorCode};
use agentchat_core::network::{
    ConsentState, InstallationInfo, MessagingNetwork, NetworkConversation, NetworkSession,
    RawMessage, SessionRequest,
};
use agentchat_core::time::{now_ms, now_ns};
use agentchat_core::wallet::{IdentitySigner, SignerError};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Inbox id the loopback network assigns to a wallet address.
pub fn inbox_id_for(address: &str) -> String {
    hex::encode(Sha256::digest(address.to_lowercase().as_bytes()))
}

fn challenge_text(identifier: &str, installation_id: &str) -> String {
    format!("agentchat loopback\nbind installation {installation_id} to {identifier}")
}

struct InstallationRecord {
    id: String,
    key_hex: String,
    created_at_ms: u64,
}

#[derive(Default)]
struct InboxRecord {
    installations: Vec<InstallationRecord>,
}

struct DmRecord {
    id: String,
    members: [String; 2],
    created_at_ms: u64,
    consent: HashMap<String, ConsentState>,
    inactive_for: HashSet<String>,
    messages: Vec<RawMessage>,
}

impl DmRecord {
    fn peer_of(&self, inbox_id: &str) -> &str {
        if self.members[0] == inbox_id {
            &self.members[1]
        } else {
            &self.members[0]
        }
    }

    fn has_member(&self, inbox_id: &str) -> bool {
        self.members.iter().any(|m| m == inbox_id)
    }
}

#[derive(Default)]
struct NetState {
    inboxes: HashMap<String, InboxRecord>,
    conversations: BTreeMap<String, DmRecord>,
    poisoned_keys: HashSet<String>,
    last_ns: i128,
}

impl NetState {
    fn next_ns(&mut self) -> i128 {
        self.last_ns = now_ns().max(self.last_ns + 1);
        self.last_ns
    }

    fn installation_live(&self, inbox_id: &str, installation_id: &str) -> bool {
        self.inboxes
            .get(inbox_id)
            .is_some_and(|i| i.installations.iter().any(|r| r.id == installation_id))
    }
}

struct Shared {
    state: Mutex<NetState>,
    quota: usize,
    storage_available: AtomicBool,
    syncs: AtomicUsize,
    feed: broadcast::Sender<RawMessage>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// In-memory messaging network with the same failure surface as the real
/// one: installation quota, consent, inactive conversations and storage
/// restrictions.
#[derive(Clone)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_INSTALLATION_QUOTA)
    }

    pub fn with_quota(quota: usize) -> Self {
        let (feed, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(NetState::default()),
                quota,
                storage_available: AtomicBool::new(true),
                syncs: AtomicUsize::new(0),
                feed,
            }),
        }
    }

    pub fn quota(&self) -> usize {
        self.shared.quota
    }

    pub fn set_storage_available(&self, available: bool) {
        self.shared
            .storage_available
            .store(available, Ordering::SeqCst);
    }

    /// Make any session presenting `key_hex` fail as a corrupted key.
    pub fn poison_key(&self, key_hex: &str) {
        self.shared.lock().poisoned_keys.insert(key_hex.to_string());
    }

    /// Register installations for `address` until it holds `count`.
    pub fn fill_installations(&self, address: &str, count: usize) {
        let inbox_id = inbox_id_for(address);
        let mut state = self.shared.lock();
        let inbox = state.inboxes.entry(inbox_id).or_default();
        while inbox.installations.len() < count {
            inbox.installations.push(InstallationRecord {
                id: uuid::Uuid::new_v4().simple().to_string(),
                key_hex: hex::encode(uuid::Uuid::new_v4().as_bytes()),
                created_at_ms: now_ms(),
            });
        }
    }

    pub fn installation_count(&self, address: &str) -> usize {
        self.shared
            .lock()
            .inboxes
            .get(&inbox_id_for(address))
            .map_or(0, |i| i.installations.len())
    }

    /// Number of network-wide syncs performed by any session.
    pub fn sync_count(&self) -> usize {
        self.shared.syncs.load(Ordering::SeqCst)
    }

    /// Create a DM between two inboxes holding `messages` text messages sent
    /// by `to`. Consent for `from` is `from_consent`.
    pub fn seed_dm(
        &self,
        from: &str,
        to: &str,
        messages: usize,
        from_consent: ConsentState,
    ) -> String {
        let mut state = self.shared.lock();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut record = DmRecord {
            id: id.clone(),
            members: [from.to_string(), to.to_string()],
            created_at_ms: now_ms(),
            consent: HashMap::from([
                (from.to_string(), from_consent),
                (to.to_string(), ConsentState::Allowed),
            ]),
            inactive_for: HashSet::new(),
            messages: Vec::new(),
        };
        for n in 0..messages {
            let sent_ns = state.next_ns();
            record.messages.push(
                RawMessage::text(
                    uuid::Uuid::new_v4().simple().to_string(),
                    &id,
                    to,
                    format!("seeded message {n}"),
                )
                .with_sent_ns(sent_ns),
            );
        }
        state.conversations.insert(id.clone(), record);
        id
    }

    /// Store and broadcast an arbitrary raw message, as if a client sent it.
    pub fn post_raw(&self, mut message: RawMessage) {
        {
            let mut state = self.shared.lock();
            if message.sent.is_none() && message.sent_ms.is_none() && message.sent_ns.is_none() {
                message.sent_ns = Some(state.next_ns());
            }
            if let Some(record) = state.conversations.get_mut(&message.conversation_id) {
                if !record.messages.iter().any(|m| m.id == message.id) {
                    record.messages.push(message.clone());
                }
            }
        }
        let _ = self.shared.feed.send(message);
    }

    /// Store a message without broadcasting it, as if the stream dropped it.
    pub fn store_silently(&self, mut message: RawMessage) {
        let mut state = self.shared.lock();
        if message.sent_ns.is_none() {
            message.sent_ns = Some(state.next_ns());
        }
        if let Some(record) = state.conversations.get_mut(&message.conversation_id) {
            record.messages.push(message);
        }
    }

    /// Re-broadcast a message without storing it again.
    pub fn replay(&self, message: RawMessage) {
        let _ = self.shared.feed.send(message);
    }

    pub fn set_consent(&self, conversation_id: &str, inbox_id: &str, consent: ConsentState) {
        if let Some(record) = self.shared.lock().conversations.get_mut(conversation_id) {
            record.consent.insert(inbox_id.to_string(), consent);
        }
    }

    pub fn consent_of(&self, conversation_id: &str, inbox_id: &str) -> Option<ConsentState> {
        let state = self.shared.lock();
        let record = state.conversations.get(conversation_id)?;
        Some(
            record
                .consent
                .get(inbox_id)
                .copied()
                .unwrap_or(ConsentState::Unknown),
        )
    }

    pub fn set_inactive(&self, conversation_id: &str, inbox_id: &str, inactive: bool) {
        if let Some(record) = self.shared.lock().conversations.get_mut(conversation_id) {
            if inactive {
                record.inactive_for.insert(inbox_id.to_string());
            } else {
                record.inactive_for.remove(inbox_id);
            }
        }
    }

    /// Ids of every DM between the two inboxes.
    pub fn conversations_between(&self, a: &str, b: &str) -> Vec<String> {
        self.shared
            .lock()
            .conversations
            .values()
            .filter(|c| c.has_member(a) && c.has_member(b))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.shared
            .lock()
            .conversations
            .get(conversation_id)
            .map_or(0, |c| c.messages.len())
    }

    fn register(
        &self,
        inbox_id: &str,
        key_hex: &str,
    ) -> Result<(String, bool), NetworkError> {
        let mut state = self.shared.lock();
        if state.poisoned_keys.contains(key_hex) {
            return Err(NetworkError::new(
                NetworkErrorCode::InvalidInstallationKey,
                "installation database key is not valid hexadecimal",
            ));
        }
        let inbox = state.inboxes.entry(inbox_id.to_string()).or_default();
        if let Some(existing) = inbox.installations.iter().find(|r| r.key_hex == key_hex) {
            return Ok((existing.id.clone(), false));
        }
        if inbox.installations.len() >= self.shared.quota {
            return Err(NetworkError::new(
                NetworkErrorCode::InstallationQuota,
                format!(
                    "Cannot register a new installation because the InboxID {inbox_id} has already registered {}/{} installations",
                    inbox.installations.len(),
                    self.shared.quota
                ),
            ));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        inbox.installations.push(InstallationRecord {
            id: id.clone(),
            key_hex: key_hex.to_string(),
            created_at_ms: now_ms(),
        });
        Ok((id, true))
    }

    fn unregister(&self, inbox_id: &str, installation_id: &str) {
        if let Some(inbox) = self.shared.lock().inboxes.get_mut(inbox_id) {
            inbox.installations.retain(|r| r.id != installation_id);
        }
    }

    fn revoke_all(&self, inbox_id: &str) -> usize {
        self.shared
            .lock()
            .inboxes
            .get_mut(inbox_id)
            .map_or(0, |i| std::mem::take(&mut i.installations).len())
    }
}

fn signer_failure(err: SignerError) -> NetworkError {
    match err {
        SignerError::Rejected => {
            NetworkError::new(NetworkErrorCode::SignatureRejected, "user rejected the request")
        }
        other => NetworkError::new(NetworkErrorCode::Other, other.to_string()),
    }
}

#[async_trait]
impl MessagingNetwork for LoopbackNetwork {
    fn persistent_storage_available(&self) -> bool {
        self.shared.storage_available.load(Ordering::SeqCst)
    }

    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<Arc<dyn NetworkSession>, NetworkError> {
        if !self.persistent_storage_available() {
            return Err(NetworkError::new(
                NetworkErrorCode::StorageUnavailable,
                "persistent storage is not available",
            ));
        }
        let inbox_id = inbox_id_for(&request.identifier);
        let (installation_id, registered) =
            self.register(&inbox_id, request.installation_key.as_hex())?;

        if registered {
            let challenge = challenge_text(&request.identifier, &installation_id);
            if let Err(e) = request.signer.sign(&challenge).await {
                self.unregister(&inbox_id, &installation_id);
                return Err(signer_failure(e));
            }
            tracing::debug!(%inbox_id, %installation_id, "registered installation");
        }

        Ok(Arc::new(LoopbackSession {
            network: self.clone(),
            inbox_id,
            installation_id,
            closed: AtomicBool::new(false),
        }))
    }

    async fn inbox_id_for_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<String>, NetworkError> {
        let inbox_id = inbox_id_for(identifier);
        let known = self.shared.lock().inboxes.contains_key(&inbox_id);
        Ok(known.then_some(inbox_id))
    }

    async fn revoke_all_installations(
        &self,
        identifier: &str,
        signer: &IdentitySigner,
    ) -> Result<usize, NetworkError> {
        let challenge = format!("agentchat loopback\nrevoke all installations of {identifier}");
        signer.sign(&challenge).await.map_err(signer_failure)?;
        Ok(self.revoke_all(&inbox_id_for(identifier)))
    }
}

pub struct LoopbackSession {
    network: LoopbackNetwork,
    inbox_id: String,
    installation_id: String,
    closed: AtomicBool,
}

impl LoopbackSession {
    fn check_live(&self) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::new(NetworkErrorCode::Unavailable, "session closed"));
        }
        if !self
            .network
            .shared
            .lock()
            .installation_live(&self.inbox_id, &self.installation_id)
        {
            return Err(NetworkError::new(
                NetworkErrorCode::Unavailable,
                "installation has been revoked",
            ));
        }
        Ok(())
    }

    fn handle(&self, id: &str) -> Arc<dyn NetworkConversation> {
        Arc::new(LoopbackConversation {
            network: self.network.clone(),
            id: id.to_string(),
            self_inbox_id: self.inbox_id.clone(),
        })
    }
}

#[async_trait]
impl NetworkSession for LoopbackSession {
    fn inbox_id(&self) -> String {
        self.inbox_id.clone()
    }

    fn installation_id(&self) -> String {
        self.installation_id.clone()
    }

    async fn sync_all(&self, _consent: &[ConsentState]) -> Result<(), NetworkError> {
        self.check_live()?;
        self.network.shared.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_dms(
        &self,
        consent: &[ConsentState],
    ) -> Result<Vec<Arc<dyn NetworkConversation>>, NetworkError> {
        self.check_live()?;
        let ids: Vec<String> = {
            let state = self.network.shared.lock();
            state
                .conversations
                .values()
                .filter(|c| c.has_member(&self.inbox_id))
                .filter(|c| {
                    let own = c
                        .consent
                        .get(&self.inbox_id)
                        .copied()
                        .unwrap_or(ConsentState::Unknown);
                    consent.contains(&own)
                })
                .map(|c| c.id.clone())
                .collect()
        };
        Ok(ids.iter().map(|id| self.handle(id)).collect())
    }

    async fn create_dm(
        &self,
        peer_inbox_id: &str,
    ) -> Result<Arc<dyn NetworkConversation>, NetworkError> {
        self.check_live()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let record = DmRecord {
            id: id.clone(),
            members: [self.inbox_id.clone(), peer_inbox_id.to_string()],
            created_at_ms: now_ms(),
            consent: HashMap::from([
                (self.inbox_id.clone(), ConsentState::Allowed),
                (peer_inbox_id.to_string(), ConsentState::Unknown),
            ]),
            inactive_for: HashSet::new(),
            messages: Vec::new(),
        };
        self.network
            .shared
            .lock()
            .conversations
            .insert(id.clone(), record);
        tracing::debug!(conversation_id = %id, peer = %peer_inbox_id, "created dm");
        Ok(self.handle(&id))
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Arc<dyn NetworkConversation>>, NetworkError> {
        self.check_live()?;
        let exists = self
            .network
            .shared
            .lock()
            .conversations
            .get(conversation_id)
            .is_some_and(|c| c.has_member(&self.inbox_id));
        Ok(exists.then(|| self.handle(conversation_id)))
    }

    async fn stream_all_messages(
        &self,
    ) -> Result<BoxStream<'static, Result<RawMessage, NetworkError>>, NetworkError> {
        self.check_live()?;
        let shared = self.network.shared.clone();
        let inbox_id = self.inbox_id.clone();
        let stream = BroadcastStream::new(shared.feed.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(message) => {
                    let member = shared
                        .lock()
                        .conversations
                        .get(&message.conversation_id)
                        .is_some_and(|c| c.has_member(&inbox_id));
                    member.then_some(Ok(message))
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(NetworkError::new(
                    NetworkErrorCode::StreamClosed,
                    format!("stream lagged by {n} messages"),
                ))),
            };
            futures_util::future::ready(out)
        });
        Ok(stream.boxed())
    }

    async fn installations(&self) -> Result<Vec<InstallationInfo>, NetworkError> {
        let state = self.network.shared.lock();
        Ok(state
            .inboxes
            .get(&self.inbox_id)
            .map(|i| {
                i.installations
                    .iter()
                    .map(|r| InstallationInfo {
                        id: r.id.clone(),
                        created_at_ms: r.created_at_ms,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn revoke_all_installations(&self) -> Result<usize, NetworkError> {
        self.check_live()?;
        Ok(self.network.revoke_all(&self.inbox_id))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct LoopbackConversation {
    network: LoopbackNetwork,
    id: String,
    self_inbox_id: String,
}

impl LoopbackConversation {
    fn with_record<T>(&self, f: impl FnOnce(&mut DmRecord) -> T) -> Result<T, NetworkError> {
        let mut state = self.network.shared.lock();
        state
            .conversations
            .get_mut(&self.id)
            .map(f)
            .ok_or_else(|| {
                NetworkError::new(
                    NetworkErrorCode::ConversationNotFound,
                    format!("conversation {} not found", self.id),
                )
            })
    }
}

#[async_trait]
impl NetworkConversation for LoopbackConversation {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn peer_inbox_id(&self) -> String {
        self.with_record(|r| r.peer_of(&self.self_inbox_id).to_string())
            .unwrap_or_default()
    }

    fn created_at_ms(&self) -> u64 {
        self.with_record(|r| r.created_at_ms).unwrap_or_default()
    }

    async fn consent_state(&self) -> Result<ConsentState, NetworkError> {
        self.with_record(|r| {
            r.consent
                .get(&self.self_inbox_id)
                .copied()
                .unwrap_or(ConsentState::Unknown)
        })
    }

    async fn update_consent_state(&self, consent: ConsentState) -> Result<(), NetworkError> {
        self.with_record(|r| {
            r.consent.insert(self.self_inbox_id.clone(), consent);
        })
    }

    async fn sync(&self) -> Result<(), NetworkError> {
        self.with_record(|_| ())
    }

    async fn is_active(&self) -> Result<bool, NetworkError> {
        self.with_record(|r| !r.inactive_for.contains(&self.self_inbox_id))
    }

    async fn message_count(&self) -> Result<usize, NetworkError> {
        self.with_record(|r| r.messages.len())
    }

    async fn messages(&self) -> Result<Vec<RawMessage>, NetworkError> {
        self.with_record(|r| r.messages.clone())
    }

    async fn send_text(&self, text: &str) -> Result<String, NetworkError> {
        let message = {
            let mut state = self.network.shared.lock();
            let sent_ns = state.next_ns();
            let record = state.conversations.get_mut(&self.id).ok_or_else(|| {
                NetworkError::new(
                    NetworkErrorCode::ConversationNotFound,
                    format!("conversation {} not found", self.id),
                )
            })?;
            if record.inactive_for.contains(&self.self_inbox_id) {
                return Err(NetworkError::new(
                    NetworkErrorCode::ConversationInactive,
                    "conversation is inactive",
                ));
            }
            let message = RawMessage::text(
                uuid::Uuid::new_v4().simple().to_string(),
                &self.id,
                &self.self_inbox_id,
                text,
            )
            .with_sent_ns(sent_ns);
            record.messages.push(message.clone());
            message
        };
        let id = message.id.clone();
        let _ = self.network.shared.feed.send(message);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::LoopbackSigner;
    use agentchat_core::config::NetworkEnv;
    use agentchat_core::installation::InstallationCredential;

    const ALICE: &str = "0xAAAA000000000000000000000000000000000001";

    fn request(key: &InstallationCredential, signer: &LoopbackSigner) -> SessionRequest {
        SessionRequest {
            identifier: ALICE.to_lowercase(),
            env: NetworkEnv::Local,
            installation_key: key.clone(),
            resumed: false,
            signer: IdentitySigner::new(ALICE, Arc::new(signer.clone())),
        }
    }

    #[test]
    fn inbox_id_ignores_case() {
        assert_eq!(inbox_id_for(ALICE), inbox_id_for(&ALICE.to_lowercase()));
        assert_eq!(inbox_id_for(ALICE).len(), 64);
    }

    #[tokio::test]
    async fn same_key_reuses_installation() {
        let net = LoopbackNetwork::new();
        let signer = LoopbackSigner::new(ALICE);
        let key = InstallationCredential::generate();
        let a = net.create_session(request(&key, &signer)).await.unwrap();
        let b = net.create_session(request(&key, &signer)).await.unwrap();
        assert_eq!(a.installation_id(), b.installation_id());
        assert_eq!(net.installation_count(ALICE), 1);
        assert_eq!(signer.signatures(), 1);
    }

    #[tokio::test]
    async fn inbox_lookup_only_knows_registered_wallets() {
        let net = LoopbackNetwork::new();
        assert_eq!(net.inbox_id_for_identifier(ALICE).await.unwrap(), None);
        let signer = LoopbackSigner::new(ALICE);
        net.create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .unwrap();
        assert_eq!(
            net.inbox_id_for_identifier(&ALICE.to_lowercase()).await.unwrap(),
            Some(inbox_id_for(ALICE))
        );
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let net = LoopbackNetwork::with_quota(2);
        net.fill_installations(ALICE, 2);
        let signer = LoopbackSigner::new(ALICE);
        let err = net
            .create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, NetworkErrorCode::InstallationQuota);
        assert!(err.message.contains("2/2 installations"));
    }

    #[tokio::test]
    async fn rejected_signature_registers_nothing() {
        let net = LoopbackNetwork::new();
        let signer = LoopbackSigner::new(ALICE);
        signer.set_reject(true);
        let err = net
            .create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, NetworkErrorCode::SignatureRejected);
        assert_eq!(net.installation_count(ALICE), 0);
    }

    #[tokio::test]
    async fn dm_consent_and_stream_membership() {
        let net = LoopbackNetwork::new();
        let signer = LoopbackSigner::new(ALICE);
        let session = net
            .create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .unwrap();
        let mut stream = session.stream_all_messages().await.unwrap();

        let other = net.seed_dm("bob", "carol", 0, ConsentState::Allowed);
        let dm = session.create_dm("agent").await.unwrap();
        assert_eq!(dm.consent_state().await.unwrap(), ConsentState::Allowed);
        assert_eq!(net.consent_of(&dm.id(), "agent"), Some(ConsentState::Unknown));
        assert_eq!(dm.peer_inbox_id(), "agent");

        net.post_raw(RawMessage::text("foreign", &other, "bob", "not for alice"));
        let id = dm.send_text("hello").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(dm.message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn inactive_conversation_refuses_send() {
        let net = LoopbackNetwork::new();
        let signer = LoopbackSigner::new(ALICE);
        let session = net
            .create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .unwrap();
        let dm = session.create_dm("agent").await.unwrap();
        net.set_inactive(&dm.id(), &session.inbox_id(), true);
        assert!(!dm.is_active().await.unwrap());
        let err = dm.send_text("hi").await.unwrap_err();
        assert_eq!(err.code, NetworkErrorCode::ConversationInactive);
    }

    #[tokio::test]
    async fn revoked_session_stops_working() {
        let net = LoopbackNetwork::new();
        let signer = LoopbackSigner::new(ALICE);
        let session = net
            .create_session(request(&InstallationCredential::generate(), &signer))
            .await
            .unwrap();
        assert_eq!(session.revoke_all_installations().await.unwrap(), 1);
        assert_eq!(net.installation_count(ALICE), 0);
        assert!(session.sync_all(&[]).await.is_err());
    }
}
