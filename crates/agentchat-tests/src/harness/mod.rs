pub mod chat;

use agentchat_core::Message;
use std::future::Future;
use std::time::Duration;

/// Poll `check` until it returns true, or timeout. Returns the last result.
pub async fn poll_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll the engine's message list until it holds at least `count` messages.
pub async fn poll_messages_until(
    chat: &chat::TestChat,
    count: usize,
    timeout: Duration,
) -> Vec<Message> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let messages = chat.engine.state().await.messages;
        if messages.len() >= count || tokio::time::Instant::now() >= deadline {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("agentchat_core=debug,agentchat_loopback=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
