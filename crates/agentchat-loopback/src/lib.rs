//! In-memory messaging network for local runs and end-to-end tests.
//!
//! Implements the engine's network traits with shared state, plus a
//! deterministic wallet and a small echo agent to talk to.

pub mod agent;
pub mod network;
pub mod wallet;

pub use agent::{EchoAgent, spawn_echo_agent};
pub use network::{LoopbackNetwork, inbox_id_for};
pub use wallet::{FixedWalletSource, LoopbackSigner};
