use agentchat_core::wallet::{CandidateWallet, ConnectorKind, SignerError, WalletSigner, WalletSource};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct SignerState {
    reject: AtomicBool,
    signatures: AtomicUsize,
    chain_id: AtomicU64,
    required_chain_id: Option<u64>,
}

/// Deterministic signer producing 65-byte signatures that are not valid
/// ECDSA but have the right shape. Clones share counters and flags.
#[derive(Clone)]
pub struct LoopbackSigner {
    address: String,
    state: Arc<SignerState>,
}

impl LoopbackSigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self::build(address.into(), 1, None)
    }

    /// A signer that starts on `chain_id` but must sign on `required`.
    pub fn on_chain(address: impl Into<String>, chain_id: u64, required: u64) -> Self {
        Self::build(address.into(), chain_id, Some(required))
    }

    fn build(address: String, chain_id: u64, required_chain_id: Option<u64>) -> Self {
        Self {
            address,
            state: Arc::new(SignerState {
                reject: AtomicBool::new(false),
                signatures: AtomicUsize::new(0),
                chain_id: AtomicU64::new(chain_id),
                required_chain_id,
            }),
        }
    }

    /// Make subsequent signature requests fail as if the user declined.
    pub fn set_reject(&self, reject: bool) {
        self.state.reject.store(reject, Ordering::SeqCst);
    }

    /// Number of signatures produced so far.
    pub fn signatures(&self) -> usize {
        self.state.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for LoopbackSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        if self.state.reject.load(Ordering::SeqCst) {
            return Err(SignerError::Rejected);
        }
        let head = Sha256::digest(format!("{}:{message}", self.address.to_lowercase()));
        let tail = Sha256::digest(head);
        let mut sig = Vec::with_capacity(65);
        sig.extend_from_slice(&head);
        sig.extend_from_slice(&tail);
        sig.push(27);
        self.state.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0x{}", hex::encode(sig)))
    }

    fn required_chain_id(&self) -> Option<u64> {
        self.state.required_chain_id
    }

    async fn chain_id(&self) -> Result<u64, SignerError> {
        Ok(self.state.chain_id.load(Ordering::SeqCst))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), SignerError> {
        if self.state.reject.load(Ordering::SeqCst) {
            return Err(SignerError::Rejected);
        }
        self.state.chain_id.store(chain_id, Ordering::SeqCst);
        Ok(())
    }
}

/// Wallet source with a fixed, mutable candidate list.
pub struct FixedWalletSource {
    authenticated: AtomicBool,
    wallets: Mutex<Vec<CandidateWallet>>,
}

impl FixedWalletSource {
    pub fn empty() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            wallets: Mutex::new(Vec::new()),
        }
    }

    /// One embedded wallet signed by `signer`.
    pub fn single(signer: LoopbackSigner) -> Self {
        let source = Self::empty();
        source.push(ConnectorKind::Embedded, Arc::new(signer));
        source
    }

    pub fn push(&self, connector: ConnectorKind, signer: Arc<dyn WalletSigner>) {
        let mut wallets = self.wallets.lock().unwrap_or_else(|p| p.into_inner());
        wallets.push(CandidateWallet {
            address: signer.address(),
            connector,
            signer,
        });
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletSource for FixedWalletSource {
    async fn candidates(&self) -> Vec<CandidateWallet> {
        self.wallets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}
