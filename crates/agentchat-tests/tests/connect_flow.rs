use agentchat_core::ChatError;
use agentchat_core::collab::{Profile, ProfileResolver};
use agentchat_core::network::ConsentState;
use agentchat_core::wallet::{ConnectorKind, WalletSigner};
use agentchat_loopback::{FixedWalletSource, LoopbackSigner};
use agentchat_tests::harness::chat::{AGENT_WALLET, TestChat, USER_WALLET};
use agentchat_tests::harness::init_tracing;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn first_connect_creates_allowed_conversation() {
    init_tracing();
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();

    let state = chat.engine.state().await;
    assert!(state.is_connected);
    assert!(!state.is_connecting);
    assert!(state.error.is_none());
    assert!(state.messages.is_empty());

    let conversation = chat.only_conversation().expect("exactly one conversation");
    assert_eq!(
        chat.network.consent_of(&conversation, &chat.user_inbox()),
        Some(ConsentState::Allowed)
    );

    let identity = chat.engine.identity().await.unwrap();
    assert_eq!(identity.address, USER_WALLET);
    assert_eq!(identity.inbox_id, chat.user_inbox());
    assert!(chat.stored_key().is_some());
}

#[tokio::test]
async fn restart_resumes_installation_and_conversation() {
    init_tracing();
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();
    let first = chat.engine.identity().await.unwrap();
    let stored = chat.stored_key();
    chat.engine.disconnect().await;

    let engine = chat.restart();
    engine.connect().await.unwrap();
    let second = engine.identity().await.unwrap();

    assert_eq!(first.installation_id, second.installation_id);
    assert_eq!(chat.stored_key(), stored);
    assert_eq!(chat.network.installation_count(USER_WALLET), 1);
    // Only the first registration needed a signature.
    assert_eq!(chat.signer.signatures(), 1);
    assert!(chat.only_conversation().is_some());
}

#[tokio::test]
async fn connect_while_connected_is_a_no_op() {
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();
    let identity = chat.engine.identity().await.unwrap();
    chat.engine.connect().await.unwrap();
    assert_eq!(chat.engine.identity().await.unwrap(), identity);
    assert_eq!(chat.network.installation_count(USER_WALLET), 1);
}

#[tokio::test]
async fn concurrent_connects_establish_one_session() {
    let chat = TestChat::spawn().await.unwrap();
    let a = chat.engine.clone();
    let b = chat.engine.clone();
    let (ra, rb) = tokio::join!(a.connect(), b.connect());
    ra.unwrap();
    rb.unwrap();
    assert!(chat.engine.state().await.is_connected);
    assert_eq!(chat.network.installation_count(USER_WALLET), 1);
    assert!(chat.only_conversation().is_some());
}

#[tokio::test]
async fn unauthenticated_user_is_told_to_sign_in() {
    let chat = TestChat::spawn().await.unwrap();
    chat.wallets.set_authenticated(false);
    let err = chat.engine.connect().await.unwrap_err();
    assert!(matches!(err, ChatError::NotAuthenticated));
    let state = chat.engine.state().await;
    assert!(!state.is_connected);
    assert_eq!(state.error.as_deref(), Some("Sign in to start chatting."));
}

#[tokio::test]
async fn missing_wallet_gives_up_after_retries() {
    let chat = TestChat::builder()
        .wallets(Arc::new(FixedWalletSource::empty()))
        .spawn()
        .await
        .unwrap();
    let err = chat.engine.connect().await.unwrap_err();
    assert!(matches!(err, ChatError::WalletUnavailable { attempts: 3 }));
    assert!(chat.engine.state().await.error.is_some());
}

#[tokio::test]
async fn wallet_that_appears_late_is_bound() {
    let wallets = Arc::new(FixedWalletSource::empty());
    let chat = TestChat::builder()
        .wallets(wallets.clone())
        .configure(|c| {
            c.wallet_retry_step_ms = 50;
            c.wallet_retry_attempts = 20;
        })
        .spawn()
        .await
        .unwrap();

    let late = wallets.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        late.push(
            ConnectorKind::Embedded,
            Arc::new(LoopbackSigner::new(USER_WALLET)),
        );
    });

    chat.engine.connect().await.unwrap();
    assert_eq!(
        chat.engine.identity().await.unwrap().address,
        USER_WALLET
    );
}

#[tokio::test]
async fn wallet_on_wrong_chain_is_switched() {
    let signer = LoopbackSigner::on_chain(USER_WALLET, 1, 8453);
    let chat = TestChat::builder()
        .signer(signer.clone())
        .spawn()
        .await
        .unwrap();
    chat.engine.connect().await.unwrap();
    assert_eq!(signer.chain_id().await.unwrap(), 8453);
}

#[tokio::test]
async fn disconnect_resets_state() {
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();
    chat.engine.send_message("hello").await.unwrap();
    chat.engine.disconnect().await;

    let state = chat.engine.state().await;
    assert!(!state.is_connected);
    assert!(state.messages.is_empty());
    assert!(chat.engine.identity().await.is_none());
    assert!(matches!(
        chat.engine.send_message("again").await,
        Err(ChatError::NotConnected)
    ));
}

#[tokio::test]
async fn agent_inbox_is_resolved_from_its_wallet() {
    let chat = TestChat::builder()
        .configure(|c| c.agent_address.clear())
        .spawn()
        .await
        .unwrap();
    chat.engine.connect().await.unwrap();

    assert_eq!(chat.engine.agent_inbox_id().await, Some(chat.agent_inbox()));
    assert!(chat.only_conversation().is_some());
    let report = chat.engine.diagnostics().await.unwrap();
    assert_eq!(report.expected_peer_id, chat.agent_inbox());
}

#[tokio::test]
async fn unknown_agent_wallet_fails_before_registering() {
    let chat = TestChat::builder()
        .configure(|c| {
            c.agent_address.clear();
            c.agent_wallet_address = "0x9999000000000000000000000000000000000009".into();
        })
        .spawn()
        .await
        .unwrap();

    let err = chat.engine.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::AgentUnresolved { ref address } if address.starts_with("0x9999")
    ));
    assert!(!chat.engine.state().await.is_connected);
    assert_eq!(chat.network.installation_count(USER_WALLET), 0);
}

#[tokio::test]
async fn missing_agent_is_a_configuration_error() {
    let chat = TestChat::builder()
        .configure(|c| {
            c.agent_address.clear();
            c.agent_wallet_address.clear();
        })
        .spawn()
        .await
        .unwrap();

    assert!(matches!(
        chat.engine.connect().await,
        Err(ChatError::AgentNotConfigured)
    ));
    assert_eq!(chat.network.installation_count(USER_WALLET), 0);
}

struct OneName;

#[async_trait]
impl ProfileResolver for OneName {
    async fn profile(&self, address: &str) -> Option<Profile> {
        (address == AGENT_WALLET).then(|| Profile {
            name: Some("agent.base.eth".into()),
            avatar_url: None,
        })
    }
}

#[tokio::test]
async fn display_names_come_from_the_profile_resolver() {
    let chat = TestChat::builder()
        .profiles(Arc::new(OneName))
        .spawn()
        .await
        .unwrap();
    assert_eq!(chat.engine.display_name(AGENT_WALLET).await, "agent.base.eth");
    assert_eq!(chat.engine.display_name(USER_WALLET).await, "0x1111…eeee");

    let plain = TestChat::spawn().await.unwrap();
    assert_eq!(plain.engine.display_name(AGENT_WALLET).await, "0xd003…d155");
}
