use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ChatError, ChatResult};

/// Length in bytes of an ECDSA signature with recovery id.
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("user rejected the signature request")]
    Rejected,
    #[error("could not switch to chain {chain_id}: {reason}")]
    ChainSwitch { chain_id: u64, reason: String },
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    #[error("{0}")]
    Other(String),
}

/// Signing capability exposed by the wallet layer.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Checksummed or lowercase `0x` address of the signing account.
    fn address(&self) -> String;

    /// EIP-191 personal sign. Returns the `0x`-prefixed hex signature.
    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;

    /// Chain the signer must be on before signing, if any.
    fn required_chain_id(&self) -> Option<u64> {
        None
    }

    async fn chain_id(&self) -> Result<u64, SignerError>;

    async fn switch_chain(&self, chain_id: u64) -> Result<(), SignerError>;
}

/// How a candidate wallet reached the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    /// The account type native to the hosting platform.
    PlatformNative,
    /// An externally detected wallet (browser extension, mobile deeplink).
    External,
    /// The embedded wallet created at sign-in.
    Embedded,
    Other,
}

#[derive(Clone)]
pub struct CandidateWallet {
    pub address: String,
    pub connector: ConnectorKind,
    pub signer: Arc<dyn WalletSigner>,
}

impl fmt::Debug for CandidateWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateWallet")
            .field("address", &self.address)
            .field("connector", &self.connector)
            .finish()
    }
}

/// The host's eventually-consistent list of connected wallets.
#[async_trait]
pub trait WalletSource: Send + Sync {
    async fn candidates(&self) -> Vec<CandidateWallet>;
    async fn is_authenticated(&self) -> bool;
}

/// Pick the wallet to bind: platform-native, then external, then embedded,
/// then whatever came first.
pub fn select_wallet(candidates: &[CandidateWallet]) -> Option<&CandidateWallet> {
    [
        ConnectorKind::PlatformNative,
        ConnectorKind::External,
        ConnectorKind::Embedded,
    ]
    .iter()
    .find_map(|kind| candidates.iter().find(|c| c.connector == *kind))
    .or_else(|| candidates.first())
}

/// Bounded retry schedule for wallet discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    step: Duration,
    max_attempts: u32,
}

impl RetrySchedule {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            step,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt, or `None` when
    /// the schedule is exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.step)
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 10)
    }
}

/// A wallet selected for the lifetime of a session.
#[derive(Clone)]
pub struct BoundWallet {
    /// Lowercase `0x` address.
    pub address: String,
    pub connector: ConnectorKind,
    pub signer: Arc<dyn WalletSigner>,
}

impl fmt::Debug for BoundWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundWallet")
            .field("address", &self.address)
            .field("connector", &self.connector)
            .finish()
    }
}

impl BoundWallet {
    pub fn identity_signer(&self) -> IdentitySigner {
        IdentitySigner::new(self.address.clone(), self.signer.clone())
    }
}

pub struct WalletBinder {
    schedule: RetrySchedule,
}

impl WalletBinder {
    pub fn new(schedule: RetrySchedule) -> Self {
        Self { schedule }
    }

    pub async fn bind(&self, source: &dyn WalletSource) -> ChatResult<BoundWallet> {
        if !source.is_authenticated().await {
            return Err(ChatError::NotAuthenticated);
        }

        let mut attempt = 1;
        loop {
            let candidates = source.candidates().await;
            if let Some(wallet) = select_wallet(&candidates) {
                let address = wallet.address.to_lowercase();
                tracing::info!(%address, connector = ?wallet.connector, attempt, "wallet bound");
                return Ok(BoundWallet {
                    address,
                    connector: wallet.connector,
                    signer: wallet.signer.clone(),
                });
            }

            match self.schedule.delay_after(attempt) {
                Some(delay) => {
                    tracing::debug!(attempt, ?delay, "no wallet candidates yet, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    tracing::warn!(attempts = attempt, "no wallet became available");
                    return Err(ChatError::WalletUnavailable { attempts: attempt });
                }
            }
        }
    }
}

/// Signer handed to the messaging network for the identity-binding challenge.
///
/// Wraps a [`WalletSigner`] and converts its hex output into raw bytes.
#[derive(Clone)]
pub struct IdentitySigner {
    address: String,
    inner: Arc<dyn WalletSigner>,
}

impl fmt::Debug for IdentitySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySigner")
            .field("address", &self.address)
            .finish()
    }
}

impl IdentitySigner {
    pub fn new(address: impl Into<String>, inner: Arc<dyn WalletSigner>) -> Self {
        Self {
            address: address.into().to_lowercase(),
            inner,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn sign(&self, text: &str) -> Result<Vec<u8>, SignerError> {
        let signature = self.inner.sign_message(text).await?;
        decode_signature(&signature)
    }
}

/// Decode a `0x`-prefixed hex signature into its 65 raw bytes.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>, SignerError> {
    let digits = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes =
        hex::decode(digits).map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(SignerError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticSigner(String);

    #[async_trait]
    impl WalletSigner for StaticSigner {
        fn address(&self) -> String {
            "0xAbC0000000000000000000000000000000000001".into()
        }
        async fn sign_message(&self, _message: &str) -> Result<String, SignerError> {
            Ok(self.0.clone())
        }
        async fn chain_id(&self) -> Result<u64, SignerError> {
            Ok(1)
        }
        async fn switch_chain(&self, _chain_id: u64) -> Result<(), SignerError> {
            Ok(())
        }
    }

    fn candidate(address: &str, connector: ConnectorKind) -> CandidateWallet {
        CandidateWallet {
            address: address.into(),
            connector,
            signer: Arc::new(StaticSigner(String::new())),
        }
    }

    /// Becomes populated after `ready_after` calls to `candidates`.
    struct DelayedSource {
        calls: AtomicU32,
        ready_after: u32,
        authenticated: bool,
    }

    #[async_trait]
    impl WalletSource for DelayedSource {
        async fn candidates(&self) -> Vec<CandidateWallet> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                vec![candidate("0xABCDEF", ConnectorKind::Embedded)]
            } else {
                Vec::new()
            }
        }
        async fn is_authenticated(&self) -> bool {
            self.authenticated
        }
    }

    #[test]
    fn selection_prefers_platform_native() {
        let list = vec![
            candidate("0x1", ConnectorKind::Other),
            candidate("0x2", ConnectorKind::Embedded),
            candidate("0x3", ConnectorKind::External),
            candidate("0x4", ConnectorKind::PlatformNative),
        ];
        assert_eq!(select_wallet(&list).unwrap().address, "0x4");
        assert_eq!(select_wallet(&list[..3]).unwrap().address, "0x3");
        assert_eq!(select_wallet(&list[..2]).unwrap().address, "0x2");
        assert_eq!(select_wallet(&list[..1]).unwrap().address, "0x1");
        assert!(select_wallet(&[]).is_none());
    }

    #[test]
    fn schedule_is_bounded() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.delay_after(1), Some(Duration::from_millis(500)));
        assert_eq!(schedule.delay_after(9), Some(Duration::from_millis(500)));
        assert_eq!(schedule.delay_after(10), None);
    }

    #[tokio::test(start_paused = true)]
    async fn bind_waits_for_late_wallet() {
        let source = DelayedSource {
            calls: AtomicU32::new(0),
            ready_after: 4,
            authenticated: true,
        };
        let started = tokio::time::Instant::now();
        let bound = WalletBinder::new(RetrySchedule::default())
            .bind(&source)
            .await
            .unwrap();
        assert_eq!(bound.address, "0xabcdef");
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn bind_gives_up_after_max_attempts() {
        let source = DelayedSource {
            calls: AtomicU32::new(0),
            ready_after: u32::MAX,
            authenticated: true,
        };
        let err = WalletBinder::new(RetrySchedule::default())
            .bind(&source)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::WalletUnavailable { attempts: 10 }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn bind_requires_authentication() {
        let source = DelayedSource {
            calls: AtomicU32::new(0),
            ready_after: 0,
            authenticated: false,
        };
        let err = WalletBinder::new(RetrySchedule::default())
            .bind(&source)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAuthenticated));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_signer_decodes_hex() {
        let sig = format!("0x{}", "ab".repeat(SIGNATURE_LEN));
        let signer = IdentitySigner::new("0xABC", Arc::new(StaticSigner(sig)));
        assert_eq!(signer.address(), "0xabc");
        let bytes = signer.sign("challenge").await.unwrap();
        assert_eq!(bytes.len(), SIGNATURE_LEN);
        assert_eq!(bytes[0], 0xab);
    }

    #[test]
    fn decode_rejects_bad_signatures() {
        assert!(decode_signature("0xabc").is_err());
        assert!(decode_signature("0xzz").is_err());
        assert!(decode_signature(&"00".repeat(64)).is_err());
        assert!(decode_signature(&"00".repeat(65)).is_ok());
    }
}
