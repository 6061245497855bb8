use std::fmt;
use std::sync::Arc;

use crate::config::NetworkEnv;
use crate::error::{ChatError, ChatResult, NetworkError, NetworkErrorCode};
use crate::installation::{InstallationCredential, InstallationKeyStore};
use crate::latch::Latch;
use crate::network::{MessagingNetwork, NetworkSession, SessionRequest};
use crate::wallet::{BoundWallet, SignerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Active,
    Disposed,
}

/// Wallet address plus the messaging identity bound to it on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Lowercase wallet address.
    pub address: String,
    pub inbox_id: String,
    pub installation_id: String,
}

/// The single live handle to the messaging network.
pub struct Session {
    identity: Identity,
    inner: Arc<dyn NetworkSession>,
    phase: SessionPhase,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Session {
    fn new(address: &str, inner: Arc<dyn NetworkSession>) -> Self {
        Self {
            identity: Identity {
                address: address.to_lowercase(),
                inbox_id: inner.inbox_id(),
                installation_id: inner.installation_id(),
            },
            inner,
            phase: SessionPhase::Init,
        }
    }

    fn activate(&mut self) {
        if self.phase == SessionPhase::Init {
            self.phase = SessionPhase::Active;
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn handle(&self) -> Arc<dyn NetworkSession> {
        self.inner.clone()
    }

    pub async fn dispose(&mut self) {
        if self.phase == SessionPhase::Disposed {
            return;
        }
        self.inner.close().await;
        self.phase = SessionPhase::Disposed;
        tracing::info!(address = %self.identity.address, "session disposed");
    }
}

fn map_signer_error(err: SignerError) -> ChatError {
    match err {
        SignerError::Rejected => ChatError::SignatureRejected,
        other => ChatError::Signer(other),
    }
}

/// Translate a session-creation failure into the engine's taxonomy.
pub fn map_creation_error(err: NetworkError, had_stored_credential: bool) -> ChatError {
    match err.code {
        NetworkErrorCode::InstallationQuota => ChatError::InstallationQuotaExceeded {
            has_stored_credential: had_stored_credential,
        },
        NetworkErrorCode::SignatureRejected => ChatError::SignatureRejected,
        NetworkErrorCode::InvalidInstallationKey => ChatError::CorruptedInstallationCredential {
            reason: err.message,
        },
        NetworkErrorCode::StorageUnavailable => ChatError::StorageUnavailable {
            reason: err.message,
        },
        _ => ChatError::Network(err),
    }
}

/// Creates or resumes the messaging identity for a bound wallet.
pub struct SessionEstablisher {
    network: Arc<dyn MessagingNetwork>,
    keys: InstallationKeyStore,
    env: NetworkEnv,
    latch: Latch,
}

impl SessionEstablisher {
    pub fn new(network: Arc<dyn MessagingNetwork>, keys: InstallationKeyStore, env: NetworkEnv) -> Self {
        Self {
            network,
            keys,
            env,
            latch: Latch::new(),
        }
    }

    pub fn is_establishing(&self) -> bool {
        self.latch.is_held()
    }

    /// Establish a session. Returns `Ok(None)` when another attempt is
    /// already in flight.
    pub async fn establish(&self, wallet: &BoundWallet) -> ChatResult<Option<Session>> {
        let Some(_guard) = self.latch.try_acquire() else {
            tracing::debug!(address = %wallet.address, "session establishment already in flight");
            return Ok(None);
        };

        self.ensure_chain(wallet).await?;
        self.check_storage()?;

        let stored = self.keys.load_validated(&wallet.address)?;
        let resumed = stored.is_some();
        let credential = stored.unwrap_or_else(InstallationCredential::generate);
        tracing::info!(address = %wallet.address, resumed, env = %self.env, "creating session");

        let (inner, credential, persist) =
            match self.create(wallet, credential.clone(), resumed).await {
                Ok(inner) => (inner, credential, !resumed),
                Err(e) if resumed && e.code == NetworkErrorCode::InvalidInstallationKey => {
                    tracing::warn!(
                        address = %wallet.address,
                        err = %e,
                        "stored installation credential rejected, retrying with a fresh one"
                    );
                    self.keys.clear(&wallet.address)?;
                    let fresh = InstallationCredential::generate();
                    let inner = self
                        .create(wallet, fresh.clone(), false)
                        .await
                        .map_err(|e| map_creation_error(e, false))?;
                    (inner, fresh, true)
                }
                Err(e) => {
                    tracing::warn!(address = %wallet.address, err = %e, "session creation failed");
                    return Err(map_creation_error(e, resumed));
                }
            };

        if persist {
            self.keys.save(&wallet.address, &credential)?;
        }

        let mut session = Session::new(&wallet.address, inner);
        session.activate();
        tracing::info!(
            address = %session.identity().address,
            inbox_id = %session.identity().inbox_id,
            installation_id = %session.identity().installation_id,
            "session established"
        );
        Ok(Some(session))
    }

    async fn create(
        &self,
        wallet: &BoundWallet,
        credential: InstallationCredential,
        resumed: bool,
    ) -> Result<Arc<dyn NetworkSession>, NetworkError> {
        self.network
            .create_session(SessionRequest {
                identifier: wallet.address.clone(),
                env: self.env,
                installation_key: credential,
                resumed,
                signer: wallet.identity_signer(),
            })
            .await
    }

    async fn ensure_chain(&self, wallet: &BoundWallet) -> ChatResult<()> {
        let Some(required) = wallet.signer.required_chain_id() else {
            return Ok(());
        };
        let current = wallet.signer.chain_id().await.map_err(map_signer_error)?;
        if current != required {
            tracing::info!(current, required, "switching wallet chain");
            wallet
                .signer
                .switch_chain(required)
                .await
                .map_err(map_signer_error)?;
        }
        Ok(())
    }

    fn check_storage(&self) -> ChatResult<()> {
        if !self.network.persistent_storage_available() {
            return Err(ChatError::StorageUnavailable {
                reason: "messaging client has no persistent storage in this environment".into(),
            });
        }
        if !self.keys.probe() {
            return Err(ChatError::StorageUnavailable {
                reason: "installation key store is not writable".into(),
            });
        }
        Ok(())
    }

    /// Revoke all installations without a session, for when the quota
    /// blocks creating one.
    pub async fn revoke_without_session(&self, wallet: &BoundWallet) -> ChatResult<usize> {
        let revoked = self
            .network
            .revoke_all_installations(&wallet.address, &wallet.identity_signer())
            .await
            .map_err(|e| map_creation_error(e, false))?;
        tracing::info!(address = %wallet.address, revoked, "revoked installations");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_records_stored_credential() {
        let err = NetworkError::new(NetworkErrorCode::InstallationQuota, "10/10");
        assert!(matches!(
            map_creation_error(err.clone(), true),
            ChatError::InstallationQuotaExceeded {
                has_stored_credential: true
            }
        ));
        assert!(matches!(
            map_creation_error(err, false),
            ChatError::InstallationQuotaExceeded {
                has_stored_credential: false
            }
        ));
    }

    #[test]
    fn other_codes_map_to_taxonomy() {
        let rejected = NetworkError::new(NetworkErrorCode::SignatureRejected, "denied");
        assert!(matches!(
            map_creation_error(rejected, false),
            ChatError::SignatureRejected
        ));
        let storage = NetworkError::new(NetworkErrorCode::StorageUnavailable, "no opfs");
        assert!(matches!(
            map_creation_error(storage, false),
            ChatError::StorageUnavailable { .. }
        ));
        let other = NetworkError::new(NetworkErrorCode::Unavailable, "down");
        assert!(matches!(map_creation_error(other, true), ChatError::Network(_)));
    }

    #[test]
    fn signer_rejection_maps_to_signature_rejected() {
        assert!(matches!(
            map_signer_error(SignerError::Rejected),
            ChatError::SignatureRejected
        ));
        assert!(matches!(
            map_signer_error(SignerError::Other("x".into())),
            ChatError::Signer(_)
        ));
    }
}
