use agentchat_core::collab::{ProfileResolver, TransactionSubmitter};
use agentchat_core::config::{DEFAULT_AGENT_WALLET_ADDRESS, NetworkEnv};
use agentchat_core::installation::{KeyValueStore, MemoryKeyValueStore, installation_key_name};
use agentchat_core::{ChatConfig, ChatEngine};
use agentchat_loopback::{
    EchoAgent, FixedWalletSource, LoopbackNetwork, LoopbackSigner, inbox_id_for, spawn_echo_agent,
};
use anyhow::Result;
use std::sync::Arc;

pub const AGENT_WALLET: &str = DEFAULT_AGENT_WALLET_ADDRESS;
pub const USER_WALLET: &str = "0x1111aaaa2222bbbb3333cccc4444dddd5555eeee";

/// Engine settings scaled down for tests.
pub fn test_config(agent_inbox_id: &str) -> ChatConfig {
    ChatConfig {
        agent_address: agent_inbox_id.to_string(),
        env: NetworkEnv::Local,
        wallet_retry_step_ms: 20,
        wallet_retry_attempts: 3,
        resync_delay_ms: 100,
        typing_timeout_ms: 400,
        stream_retry_ms: 50,
        ..ChatConfig::default()
    }
}

pub struct TestChatBuilder {
    network: LoopbackNetwork,
    store: Arc<dyn KeyValueStore>,
    signer: LoopbackSigner,
    wallets: Option<Arc<FixedWalletSource>>,
    submitter: Option<Arc<dyn TransactionSubmitter>>,
    profiles: Option<Arc<dyn ProfileResolver>>,
    configure: Option<Box<dyn FnOnce(&mut ChatConfig) + Send>>,
}

impl TestChatBuilder {
    pub fn network(mut self, network: LoopbackNetwork) -> Self {
        self.network = network;
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn signer(mut self, signer: LoopbackSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Use this wallet source instead of a single wallet for `signer`.
    pub fn wallets(mut self, wallets: Arc<FixedWalletSource>) -> Self {
        self.wallets = Some(wallets);
        self
    }

    pub fn submitter(mut self, submitter: Arc<dyn TransactionSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut ChatConfig) + Send + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    pub async fn spawn(self) -> Result<TestChat> {
        let agent = spawn_echo_agent(&self.network, AGENT_WALLET).await?;
        let mut config = test_config(&agent.inbox_id);
        if let Some(configure) = self.configure {
            configure(&mut config);
        }
        let wallets = self
            .wallets
            .unwrap_or_else(|| Arc::new(FixedWalletSource::single(self.signer.clone())));
        let mut engine = ChatEngine::new(
            config,
            Arc::new(self.network.clone()),
            wallets.clone(),
            self.store.clone(),
        );
        if let Some(submitter) = self.submitter {
            engine = engine.with_transaction_submitter(submitter);
        }
        if let Some(profiles) = self.profiles {
            engine = engine.with_profile_resolver(profiles);
        }
        Ok(TestChat {
            network: self.network,
            agent: Some(agent),
            signer: self.signer,
            wallets,
            store: self.store,
            engine: Arc::new(engine),
        })
    }
}

/// An engine for [`USER_WALLET`] talking to an echo agent over a loopback
/// network.
pub struct TestChat {
    pub network: LoopbackNetwork,
    pub agent: Option<EchoAgent>,
    pub signer: LoopbackSigner,
    pub wallets: Arc<FixedWalletSource>,
    pub store: Arc<dyn KeyValueStore>,
    pub engine: Arc<ChatEngine>,
}

impl TestChat {
    pub fn builder() -> TestChatBuilder {
        TestChatBuilder {
            network: LoopbackNetwork::new(),
            store: Arc::new(MemoryKeyValueStore::new()),
            signer: LoopbackSigner::new(USER_WALLET),
            wallets: None,
            submitter: None,
            profiles: None,
            configure: None,
        }
    }

    pub async fn spawn() -> Result<Self> {
        Self::builder().spawn().await
    }

    pub fn user_inbox(&self) -> String {
        inbox_id_for(USER_WALLET)
    }

    pub fn agent_inbox(&self) -> String {
        inbox_id_for(AGENT_WALLET)
    }

    /// Silence the agent so nothing replies.
    pub fn stop_agent(&mut self) {
        self.agent = None;
    }

    /// The credential currently persisted for the user.
    pub fn stored_key(&self) -> Option<String> {
        self.store
            .get(&installation_key_name(USER_WALLET))
            .ok()
            .flatten()
    }

    /// Id of the single conversation between user and agent on the network.
    pub fn only_conversation(&self) -> Option<String> {
        let ids = self
            .network
            .conversations_between(&self.user_inbox(), &self.agent_inbox());
        (ids.len() == 1).then(|| ids[0].clone())
    }

    /// A fresh engine over the same network and key store, as after an app
    /// restart. The agent keeps running.
    pub fn restart(&self) -> Arc<ChatEngine> {
        Arc::new(ChatEngine::new(
            self.engine.config().clone(),
            Arc::new(self.network.clone()),
            self.wallets.clone(),
            self.store.clone(),
        ))
    }
}
