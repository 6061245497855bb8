//! Wallet-side collaborators for the chat engine: a local EIP-191 signer and
//! a Base transaction submitter, both backed by alloy.

pub mod signer;
pub mod transactor;

pub use signer::LocalWallet;
pub use transactor::{BaseTransactor, explorer_url};

/// Base chain ID.
pub const BASE_CHAIN_ID: u64 = 8453;

/// Default RPC endpoint for Base mainnet.
pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";

/// Basescan base URL for transaction links.
pub const BASESCAN_TX_URL: &str = "https://basescan.org/tx/";
