use agentchat_core::config::NetworkEnv;
use agentchat_core::error::NetworkError;
use agentchat_core::installation::InstallationCredential;
use agentchat_core::network::{MessagingNetwork, NetworkSession, RawContent, RawMessage, SessionRequest};
use agentchat_core::normalize::WALLET_SEND_CALLS_CONTENT_TYPE;
use agentchat_core::wallet::IdentitySigner;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::network::LoopbackNetwork;
use crate::wallet::LoopbackSigner;

/// Text that makes the agent answer with a transaction request.
pub const PAY_COMMAND: &str = "pay";

/// An agent that echoes every text message it receives. Stops on drop.
pub struct EchoAgent {
    pub address: String,
    pub inbox_id: String,
    task: JoinHandle<()>,
}

impl EchoAgent {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for EchoAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn transaction_request(conversation_id: &str, sender: &str) -> RawMessage {
    let payload = serde_json::json!({
        "version": "1.0",
        "chainId": "0x2105",
        "from": sender,
        "calls": [{
            "to": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "value": "0x0",
            "data": "0xa9059cbb",
            "metadata": { "description": "Send 1 USDC" }
        }]
    });
    RawMessage {
        id: uuid::Uuid::new_v4().simple().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_inbox_id: sender.to_string(),
        content_type: WALLET_SEND_CALLS_CONTENT_TYPE.to_string(),
        content: RawContent::Json(payload),
        fallback: Some("Transaction request".to_string()),
        sent: None,
        sent_ms: None,
        sent_ns: None,
    }
}

async fn reply(
    network: &LoopbackNetwork,
    session: &Arc<dyn NetworkSession>,
    message: &RawMessage,
    text: &str,
) -> Result<(), NetworkError> {
    let Some(conversation) = session.get_conversation(&message.conversation_id).await? else {
        return Ok(());
    };
    if text.trim().eq_ignore_ascii_case(PAY_COMMAND) {
        network.post_raw(transaction_request(&message.conversation_id, &session.inbox_id()));
        return Ok(());
    }
    conversation.send_text(&format!("echo: {text}")).await?;
    Ok(())
}

/// Register `address` on the network and start answering its DMs.
pub async fn spawn_echo_agent(
    network: &LoopbackNetwork,
    address: &str,
) -> Result<EchoAgent, NetworkError> {
    let signer = LoopbackSigner::new(address);
    let session = network
        .create_session(SessionRequest {
            identifier: address.to_lowercase(),
            env: NetworkEnv::Local,
            installation_key: InstallationCredential::generate(),
            resumed: false,
            signer: IdentitySigner::new(address, Arc::new(signer)),
        })
        .await?;
    let inbox_id = session.inbox_id();
    let mut stream = session.stream_all_messages().await?;

    let network = network.clone();
    let self_inbox = inbox_id.clone();
    let task = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "echo agent stream error");
                    continue;
                }
            };
            if message.sender_inbox_id == self_inbox {
                continue;
            }
            let RawContent::Text(text) = &message.content else {
                continue;
            };
            if let Err(e) = reply(&network, &session, &message, text).await {
                tracing::warn!(error = %e, conversation_id = %message.conversation_id, "echo agent failed to reply");
            }
        }
        tracing::debug!("echo agent stream ended");
    });

    Ok(EchoAgent {
        address: address.to_lowercase(),
        inbox_id,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::inbox_id_for;
    use agentchat_core::network::ConsentState;
    use std::time::Duration;

    const AGENT: &str = "0xd003c827467e8e2B8FE1E7c8C11C6b5a10D4D155";

    #[tokio::test]
    async fn agent_echoes_text() {
        let net = LoopbackNetwork::new();
        let agent = spawn_echo_agent(&net, AGENT).await.unwrap();
        assert_eq!(agent.inbox_id, inbox_id_for(AGENT));

        let conv = net.seed_dm("user", &agent.inbox_id, 0, ConsentState::Allowed);
        net.post_raw(RawMessage::text("m1", &conv, "user", "hi"));

        let mut waited = 0;
        while net.message_count(&conv) < 2 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(net.message_count(&conv), 2);
        assert!(agent.is_running());
    }
}
