use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::wallet::RetrySchedule;

/// Wallet address the agent's name resolves to, used for deeplinks.
pub const DEFAULT_AGENT_WALLET_ADDRESS: &str = "0xd003c8136e974da7317521ef5866c250f17ad155";

/// Network-enforced cap on concurrent installations per identity.
pub const DEFAULT_INSTALLATION_QUOTA: usize = 10;

/// Which messaging network deployment to talk to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEnv {
    #[default]
    Production,
    Dev,
    Local,
}

impl NetworkEnv {
    /// Parse an environment name. Unknown names fall back to production.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dev" => Self::Dev,
            "local" => Self::Local,
            _ => Self::Production,
        }
    }
}

impl fmt::Display for NetworkEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEnv::Production => write!(f, "production"),
            NetworkEnv::Dev => write!(f, "dev"),
            NetworkEnv::Local => write!(f, "local"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messaging identifier (inbox id) of the agent we talk to.
    pub agent_address: String,
    /// Wallet address of the agent.
    pub agent_wallet_address: String,
    pub env: NetworkEnv,
    /// Delay between wallet-binding attempts.
    pub wallet_retry_step_ms: u64,
    /// Number of wallet-binding attempts before giving up.
    pub wallet_retry_attempts: u32,
    /// Delay before the follow-up sync that picks up the agent's reply.
    pub resync_delay_ms: u64,
    /// How long the "agent is typing" signal stays up without a reply.
    pub typing_timeout_ms: u64,
    /// Delay before resubscribing after the message stream ends. `0` disables.
    pub stream_retry_ms: u64,
    pub installation_quota: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            agent_address: String::new(),
            agent_wallet_address: DEFAULT_AGENT_WALLET_ADDRESS.to_string(),
            env: NetworkEnv::default(),
            wallet_retry_step_ms: 500,
            wallet_retry_attempts: 10,
            resync_delay_ms: 3_000,
            typing_timeout_ms: 30_000,
            stream_retry_ms: 5_000,
            installation_quota: DEFAULT_INSTALLATION_QUOTA,
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `AGENTCHAT_AGENT_ADDRESS`, `AGENTCHAT_AGENT_WALLET`
    /// and `AGENTCHAT_ENV`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(agent) = std::env::var("AGENTCHAT_AGENT_ADDRESS") {
            config.agent_address = agent.trim().to_string();
        }
        if let Ok(wallet) = std::env::var("AGENTCHAT_AGENT_WALLET") {
            config.agent_wallet_address = wallet.trim().to_lowercase();
        }
        if let Ok(env) = std::env::var("AGENTCHAT_ENV") {
            config.env = NetworkEnv::parse(&env);
        }
        config
    }

    pub fn wallet_retry(&self) -> RetrySchedule {
        RetrySchedule::new(
            Duration::from_millis(self.wallet_retry_step_ms),
            self.wallet_retry_attempts,
        )
    }

    pub fn resync_delay(&self) -> Duration {
        Duration::from_millis(self.resync_delay_ms)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn stream_retry(&self) -> Option<Duration> {
        (self.stream_retry_ms > 0).then(|| Duration::from_millis(self.stream_retry_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names() {
        assert_eq!(NetworkEnv::parse("prod"), NetworkEnv::Production);
        assert_eq!(NetworkEnv::parse("production"), NetworkEnv::Production);
        assert_eq!(NetworkEnv::parse(" DEV "), NetworkEnv::Dev);
        assert_eq!(NetworkEnv::parse("local"), NetworkEnv::Local);
        assert_eq!(NetworkEnv::parse("staging"), NetworkEnv::Production);
        assert_eq!(NetworkEnv::Dev.to_string(), "dev");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ChatConfig =
            serde_json::from_str(r#"{"agent_address":"abc","env":"dev"}"#).unwrap();
        assert_eq!(config.agent_address, "abc");
        assert_eq!(config.env, NetworkEnv::Dev);
        assert_eq!(config.wallet_retry_attempts, 10);
        assert_eq!(config.installation_quota, DEFAULT_INSTALLATION_QUOTA);
        assert_eq!(config.wallet_retry().step(), Duration::from_millis(500));
    }
}
