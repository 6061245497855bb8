use agentchat_core::network::ConsentState;
use agentchat_tests::harness::chat::TestChat;
use agentchat_tests::harness::init_tracing;

#[tokio::test]
async fn busiest_duplicate_is_selected() {
    init_tracing();
    let chat = TestChat::spawn().await.unwrap();
    let (user, agent) = (chat.user_inbox(), chat.agent_inbox());
    let _sparse = chat.network.seed_dm(&user, &agent, 1, ConsentState::Allowed);
    let busy = chat.network.seed_dm(&user, &agent, 4, ConsentState::Allowed);

    chat.engine.connect().await.unwrap();

    let state = chat.engine.state().await;
    assert_eq!(state.messages.len(), 4);
    let diagnostics = chat.engine.diagnostics().await.unwrap();
    assert_eq!(diagnostics.active_conversation_id.as_deref(), Some(busy.as_str()));
    assert_eq!(diagnostics.duplicate_target_conversations, 1);
    // Reconciliation never creates a third one.
    assert_eq!(chat.network.conversations_between(&user, &agent).len(), 2);
}

#[tokio::test]
async fn unknown_consent_duplicate_is_selected_and_allowed() {
    let chat = TestChat::spawn().await.unwrap();
    let (user, agent) = (chat.user_inbox(), chat.agent_inbox());
    chat.network.seed_dm(&user, &agent, 3, ConsentState::Allowed);
    let pending = chat.network.seed_dm(&user, &agent, 7, ConsentState::Unknown);

    chat.engine.connect().await.unwrap();

    assert_eq!(chat.engine.state().await.messages.len(), 7);
    assert_eq!(
        chat.network.consent_of(&pending, &user),
        Some(ConsentState::Allowed)
    );
}

#[tokio::test]
async fn denied_conversation_is_reused_and_allowed() {
    let chat = TestChat::spawn().await.unwrap();
    let (user, agent) = (chat.user_inbox(), chat.agent_inbox());
    let denied = chat.network.seed_dm(&user, &agent, 2, ConsentState::Denied);

    chat.engine.connect().await.unwrap();

    assert_eq!(chat.only_conversation().as_deref(), Some(denied.as_str()));
    assert_eq!(
        chat.network.consent_of(&denied, &user),
        Some(ConsentState::Allowed)
    );
    assert_eq!(chat.engine.state().await.messages.len(), 2);
}

#[tokio::test]
async fn conversations_with_others_are_ignored() {
    let chat = TestChat::spawn().await.unwrap();
    let user = chat.user_inbox();
    chat.network.seed_dm(&user, "someone-else", 5, ConsentState::Allowed);

    chat.engine.connect().await.unwrap();

    let conversation = chat.only_conversation().expect("agent conversation created");
    let diagnostics = chat.engine.diagnostics().await.unwrap();
    assert_eq!(diagnostics.active_conversation_id, Some(conversation));
    assert!(diagnostics.peer_matches);
    assert!(chat.engine.state().await.messages.is_empty());
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();
    let conversation = chat.only_conversation().unwrap();

    assert!(!chat.engine.repair_conversation().await.unwrap());
    assert!(chat.engine.force_full_sync().await.unwrap());

    assert_eq!(chat.only_conversation(), Some(conversation.clone()));
    let diagnostics = chat.engine.diagnostics().await.unwrap();
    assert_eq!(diagnostics.active_conversation_id, Some(conversation));
}

#[tokio::test]
async fn full_sync_syncs_the_network_and_reloads() {
    let chat = TestChat::spawn().await.unwrap();
    chat.engine.connect().await.unwrap();
    let conversation = chat.only_conversation().unwrap();
    let before = chat.network.sync_count();

    // Lands on the network without passing through the stream.
    chat.network.seed_dm("unrelated", "parties", 0, ConsentState::Allowed);
    chat.network.set_consent(&conversation, &chat.user_inbox(), ConsentState::Unknown);

    assert!(chat.engine.force_full_sync().await.unwrap());
    assert!(chat.network.sync_count() > before);
    assert_eq!(
        chat.network.consent_of(&conversation, &chat.user_inbox()),
        Some(ConsentState::Allowed)
    );
}
