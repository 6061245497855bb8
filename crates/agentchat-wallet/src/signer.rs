use agentchat_core::wallet::{SignerError, WalletSigner};
use alloy::signers::{SignerSync, local::PrivateKeySigner};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::BASE_CHAIN_ID;

/// A wallet holding its private key in process.
pub struct LocalWallet {
    signer: PrivateKeySigner,
    chain_id: AtomicU64,
    required_chain_id: Option<u64>,
}

impl LocalWallet {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer,
            chain_id: AtomicU64::new(BASE_CHAIN_ID),
            required_chain_id: Some(BASE_CHAIN_ID),
        }
    }

    /// Parse a `0x`-prefixed (or bare) hex private key.
    pub fn from_private_key_hex(key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .context("invalid private key")?;
        Ok(Self::new(signer))
    }

    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    /// Start on a different chain than Base, e.g. to exercise chain switching.
    pub fn on_chain(self, chain_id: u64) -> Self {
        self.chain_id.store(chain_id, Ordering::SeqCst);
        self
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> String {
        format!("{:#x}", self.signer.address())
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        let sig = self
            .signer
            .sign_message_sync(message.as_bytes())
            .map_err(|e| SignerError::Other(e.to_string()))?;
        Ok(format!("0x{}", alloy::hex::encode(sig.as_bytes())))
    }

    fn required_chain_id(&self) -> Option<u64> {
        self.required_chain_id
    }

    async fn chain_id(&self) -> Result<u64, SignerError> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), SignerError> {
        let previous = self.chain_id.swap(chain_id, Ordering::SeqCst);
        tracing::debug!(previous, chain_id, "local wallet switched chain");
        Ok(())
    }
}
