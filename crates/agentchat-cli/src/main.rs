use agentchat_core::config::NetworkEnv;
use agentchat_core::installation::{
    FileKeyValueStore, InstallationKeyStore, KeyValueStore, installation_key_name,
    validate_credential,
};
use agentchat_core::network::MessagingNetwork;
use agentchat_core::state_dir::{default_state_dir, ensure_state_dir};
use agentchat_core::wallet::{ConnectorKind, WalletSigner};
use agentchat_core::{ChatConfig, ChatEngine, ChatEvent};
use agentchat_loopback::{EchoAgent, FixedWalletSource, LoopbackNetwork, spawn_echo_agent};
use agentchat_wallet::{BaseTransactor, DEFAULT_RPC_URL, LocalWallet};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "agentchat", about = "Chat with an agent over an encrypted messaging network")]
struct Cli {
    /// State directory (default: $AGENTCHAT_STATE_DIR or ~/.local/state/agentchat).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive chat against the in-process loopback network.
    Chat {
        /// Environment variable holding the wallet private key. A throwaway
        /// wallet is used when omitted.
        #[arg(long)]
        private_key_env: Option<String>,
        /// Base RPC URL used to execute transaction requests.
        #[arg(long, default_value = DEFAULT_RPC_URL)]
        rpc_url: String,
        /// Network environment.
        #[arg(long, default_value = "local")]
        env: String,
    },
    /// Inspect or clear the stored installation key for a wallet.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Look up the inbox id a wallet address is registered under.
    InboxId {
        /// Wallet address; defaults to the configured agent wallet.
        #[arg(long)]
        address: Option<String>,
    },
    /// Print the wallet address for a private key.
    Address {
        /// Environment variable holding the wallet private key.
        #[arg(long)]
        private_key_env: String,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Show whether a key is stored.
    Show {
        #[arg(long)]
        address: String,
    },
    /// Delete the stored key.
    Clear {
        #[arg(long)]
        address: String,
    },
}

/// A line typed in the chat prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Refresh,
    Sync,
    Repair,
    Diagnostics,
    Installations,
    Revoke,
    ClearKey,
    Pay(String),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    match name {
        "refresh" => Input::Refresh,
        "sync" => Input::Sync,
        "repair" => Input::Repair,
        "diag" => Input::Diagnostics,
        "installations" => Input::Installations,
        "revoke" => Input::Revoke,
        "clearkey" => Input::ClearKey,
        "pay" if !arg.is_empty() => Input::Pay(arg.to_string()),
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
/refresh        re-sync this conversation
/sync           sync everything, then reload
/repair         re-select the agent conversation
/diag           print diagnostics
/installations  show installation usage
/revoke         revoke all installations of this wallet
/clearkey       forget the local installation key
/pay <id>       execute a transaction request
/quit           leave";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentchat_core=info,agentchat_loopback=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => default_state_dir().context("failed to determine state directory")?,
    };

    match cli.command {
        Command::Chat {
            private_key_env,
            rpc_url,
            env,
        } => cmd_chat(&state_dir, private_key_env.as_deref(), &rpc_url, &env).await,
        Command::Key { action } => {
            match action {
                KeyAction::Show { address } => {
                    let kv = FileKeyValueStore::open(&state_dir);
                    println!("{}", key_status(&kv, &address)?);
                }
                KeyAction::Clear { address } => {
                    let keys = key_store(&state_dir)?;
                    if keys.clear(&address)? {
                        println!("Cleared installation key for {address}.");
                    } else {
                        println!("No installation key stored for {address}.");
                    }
                }
            }
            Ok(())
        }
        Command::InboxId { address } => {
            let config = ChatConfig::from_env();
            let address = address.unwrap_or_else(|| config.agent_wallet_address.clone());
            let (network, _agent) = demo_network(&config).await?;
            match network.inbox_id_for_identifier(&address.to_lowercase()).await? {
                Some(inbox_id) => println!("{inbox_id}"),
                None => anyhow::bail!("{address} has no inbox on this network"),
            }
            Ok(())
        }
        Command::Address { private_key_env } => {
            let wallet = load_wallet(&private_key_env)?;
            println!("{}", wallet.address());
            Ok(())
        }
    }
}

fn key_store(state_dir: &Path) -> Result<InstallationKeyStore> {
    ensure_state_dir(state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;
    Ok(InstallationKeyStore::new(Arc::new(FileKeyValueStore::open(
        state_dir,
    ))))
}

/// Describe the stored credential without modifying the store.
fn key_status(kv: &dyn KeyValueStore, address: &str) -> Result<String> {
    Ok(match kv.get(&installation_key_name(address))? {
        Some(raw) => match validate_credential(&raw) {
            Ok(()) => format!(
                "Installation key stored for {address} ({} hex digits).",
                raw.len()
            ),
            Err(defect) => format!(
                "Installation key stored for {address} is invalid ({defect}); it is replaced on the next connect."
            ),
        },
        None => format!("No installation key stored for {address}."),
    })
}

/// The in-process network with the echo agent registered at the configured
/// agent wallet.
async fn demo_network(config: &ChatConfig) -> Result<(LoopbackNetwork, EchoAgent)> {
    let network = LoopbackNetwork::with_quota(config.installation_quota);
    let agent = spawn_echo_agent(&network, &config.agent_wallet_address)
        .await
        .context("failed to start agent")?;
    Ok((network, agent))
}

fn load_wallet(var: &str) -> Result<LocalWallet> {
    let key = std::env::var(var).with_context(|| format!("{var} is not set"))?;
    LocalWallet::from_private_key_hex(&key)
}

async fn cmd_chat(
    state_dir: &Path,
    private_key_env: Option<&str>,
    rpc_url: &str,
    env: &str,
) -> Result<()> {
    let mut config = ChatConfig::from_env();
    config.env = NetworkEnv::parse(env);

    let (network, agent) = demo_network(&config).await?;

    let (wallet, submitter) = match private_key_env {
        Some(var) => {
            let wallet = load_wallet(var)?;
            let transactor = BaseTransactor::new(wallet.signer().clone(), rpc_url)?;
            (wallet, Some(Arc::new(transactor)))
        }
        None => (LocalWallet::random(), None),
    };
    let address = wallet.address();
    let wallets = Arc::new(FixedWalletSource::empty());
    wallets.push(ConnectorKind::Embedded, Arc::new(wallet));

    ensure_state_dir(state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;
    let mut engine = ChatEngine::new(
        config,
        Arc::new(network.clone()),
        wallets,
        Arc::new(FileKeyValueStore::open(state_dir)),
    );
    if let Some(submitter) = submitter {
        engine = engine.with_transaction_submitter(submitter);
    }
    let engine = Arc::new(engine);

    let agent_name = engine.display_name(&agent.address).await;
    let agent_inbox_id = agent.inbox_id.clone();
    let you = engine.display_name(&address).await;
    let sender_label = move |sender: &str| {
        if sender == agent_inbox_id {
            agent_name.clone()
        } else {
            you.clone()
        }
    };

    let mut events = engine.subscribe();
    let label = sender_label.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::MessageAdded(message) => {
                    println!(
                        "[{}] {} ({})",
                        label(&message.sender_inbox_id),
                        message.content,
                        message.id
                    );
                }
                ChatEvent::TypingChanged(true) => println!("… agent is typing"),
                ChatEvent::Error(e) => eprintln!("error: {e}"),
                _ => {}
            }
        }
    });

    println!("Connecting as {address}…");
    if engine.connect().await.is_err() {
        let state = engine.state().await;
        anyhow::bail!(
            "{}",
            state.error.unwrap_or_else(|| "connection failed".to_string())
        );
    }
    for message in engine.state().await.messages {
        println!("[{}] {}", sender_label(&message.sender_inbox_id), message.content);
    }
    println!("Connected. Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if !handle_input(&engine, parse_input(&line)).await {
            break;
        }
    }

    engine.disconnect().await;
    printer.abort();
    drop(agent);
    Ok(())
}

/// Run one prompt command. Returns false when the user wants to leave.
async fn handle_input(engine: &ChatEngine, input: Input) -> bool {
    let quit = input == Input::Quit;
    let outcome: Result<()> = async {
        match input {
            Input::Send(text) => {
                engine.send_message(&text).await?;
            }
            Input::Refresh => {
                if !engine.refresh_messages().await? {
                    println!("A refresh is already running.");
                }
            }
            Input::Sync => {
                engine.force_full_sync().await?;
                println!("Synced ({} messages).", engine.state().await.messages.len());
            }
            Input::Repair => {
                if engine.repair_conversation().await? {
                    println!("Switched to the agent conversation.");
                } else {
                    println!("Conversation already points at the agent.");
                }
            }
            Input::Diagnostics => {
                let report = engine.diagnostics().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Input::Installations => {
                let status = engine.installation_count().await?;
                println!("{}/{} installations in use.", status.count, status.quota);
            }
            Input::Revoke => {
                let revoked = engine.revoke_all_installations().await?;
                println!("Revoked {revoked} installations. Reconnecting…");
                engine.connect().await?;
            }
            Input::ClearKey => {
                if engine.clear_local_installation_key().await? {
                    println!("Local installation key cleared.");
                }
            }
            Input::Pay(id) => {
                let receipt = engine.execute_transaction(&id).await?;
                for hash in receipt.tx_hashes {
                    println!("Sent {hash}");
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Unknown(line) => println!("Unknown command {line}. Type /help."),
            Input::Empty | Input::Quit => {}
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        eprintln!("error: {e:#}");
    }
    !quit
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchat_core::installation::InstallationCredential;

    #[test]
    fn parses_prompt_commands() {
        assert_eq!(parse_input("  hello  "), Input::Send("hello".into()));
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("/refresh"), Input::Refresh);
        assert_eq!(parse_input("/pay abc123"), Input::Pay("abc123".into()));
        assert_eq!(parse_input("/pay"), Input::Unknown("/pay".into()));
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(parse_input("/nope"), Input::Unknown("/nope".into()));
    }

    #[test]
    fn key_status_reports_stored_key() {
        let dir = tempfile::tempdir().unwrap();
        let keys = key_store(dir.path()).unwrap();
        let kv = FileKeyValueStore::open(dir.path());
        let address = "0xAbC0000000000000000000000000000000000001";
        assert!(key_status(&kv, address).unwrap().starts_with("No installation key"));

        let credential = InstallationCredential::generate();
        kv.set(&installation_key_name(address), credential.as_hex())
            .unwrap();
        assert!(key_status(&kv, address).unwrap().contains("64 hex digits"));
        assert!(keys.clear(address).unwrap());
    }

    #[test]
    fn key_status_leaves_invalid_key_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKeyValueStore::open(dir.path());
        let address = "0xAbC0000000000000000000000000000000000002";
        kv.set(&installation_key_name(address), "abc").unwrap();

        let status = key_status(&kv, address).unwrap();
        assert!(status.contains("is invalid"));
        assert!(status.contains("odd number of hex digits"));
        assert_eq!(
            kv.get(&installation_key_name(address)).unwrap().as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn demo_network_registers_the_agent_wallet() {
        let config = ChatConfig::default();
        let (network, agent) = demo_network(&config).await.unwrap();
        assert_eq!(
            network
                .inbox_id_for_identifier(&config.agent_wallet_address)
                .await
                .unwrap(),
            Some(agent.inbox_id.clone())
        );
    }
}
