//! Contracts for collaborators outside the engine: transaction execution and
//! profile lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::TransactionPayload;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("user rejected the transaction")]
    Rejected,
    #[error("transaction request is invalid: {0}")]
    Invalid(String),
    #[error("transaction failed: {0}")]
    Failed(String),
    #[error("no transaction submitter is configured")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// One hash per executed call, in call order.
    pub tx_hashes: Vec<String>,
}

/// Executes a transaction request. How it executes is up to the implementor.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn submit(&self, payload: &TransactionPayload) -> Result<TransactionReceipt, SubmitError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Social profile lookup by wallet address.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn profile(&self, address: &str) -> Option<Profile>;
}

/// `0x1234…abcd` form of an address.
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

/// Name to show for an address: the resolved profile name, else the
/// shortened address.
pub async fn display_name(resolver: &dyn ProfileResolver, address: &str) -> String {
    match resolver.profile(address).await.and_then(|p| p.name) {
        Some(name) if !name.trim().is_empty() => name,
        _ => short_address(address),
    }
}
