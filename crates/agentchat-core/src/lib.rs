//! Session and conversation engine for chatting with a single agent over an
//! end-to-end encrypted messaging network.
//!
//! The engine binds a wallet, establishes a messaging session that reuses the
//! device installation across restarts, reconciles the one conversation with
//! the agent, and keeps a local message list consistent with the network.
//! The network itself is consumed through the traits in [`network`].

pub mod collab;
pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod installation;
pub mod latch;
pub mod network;
pub mod normalize;
pub mod outbound;
pub mod session;
pub mod state_dir;
pub mod stream;
pub mod time;
pub mod timeline;
pub mod wallet;

pub use config::{ChatConfig, NetworkEnv};
pub use engine::{ChatEngine, ChatEvent, ChatState};
pub use error::{ChatError, NetworkError, NetworkErrorCode};
pub use normalize::{Message, MessageKind, normalize};
