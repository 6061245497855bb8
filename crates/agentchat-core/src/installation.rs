use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Minimum number of hex digits (32 bytes) for a usable credential.
pub const MIN_CREDENTIAL_HEX_LEN: usize = 64;

const KEY_PREFIX: &str = "installation_key_";
const LEGACY_KEY_PREFIX: &str = "xmtp_installation_key_";
const KEYS_FILE: &str = "installation_keys.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid key store contents: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted string key/value store owned by the host environment.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Whether values written now will survive a restart.
    fn probe(&self) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local store. Survives nothing; `probe` reports whatever it was
/// constructed with so tests can simulate restricted environments.
pub struct MemoryKeyValueStore {
    map: Mutex<BTreeMap<String, String>>,
    persistent: bool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            persistent: true,
        }
    }

    /// A store whose `probe` fails.
    pub fn unavailable() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            persistent: false,
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.map).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.map).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.map).remove(key);
        Ok(())
    }

    fn probe(&self) -> bool {
        self.persistent
    }
}

/// JSON object persisted at `<state_dir>/installation_keys.json` with `0600`
/// permissions.
pub struct FileKeyValueStore {
    state_dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn open(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            path: state_dir.join(KEYS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn write_all(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        crate::state_dir::ensure_state_dir(&self.state_dir)?;
        let data = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, data)?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value.to_string());
        self.write_all(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }

    fn probe(&self) -> bool {
        crate::state_dir::probe_writable(&self.state_dir)
    }
}

/// Storage key for a wallet's installation credential.
pub fn installation_key_name(address: &str) -> String {
    format!("{KEY_PREFIX}{}", address.to_lowercase())
}

fn legacy_key_name(address: &str) -> String {
    format!("{LEGACY_KEY_PREFIX}{}", address.to_lowercase())
}

/// Why a stored credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialDefect {
    #[error("odd number of hex digits")]
    OddLength,
    #[error("contains non-hex characters")]
    NonHex,
    #[error("shorter than {MIN_CREDENTIAL_HEX_LEN} hex digits")]
    TooShort,
}

pub fn validate_credential(raw: &str) -> Result<(), CredentialDefect> {
    if raw.len() % 2 != 0 {
        return Err(CredentialDefect::OddLength);
    }
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CredentialDefect::NonHex);
    }
    if raw.len() < MIN_CREDENTIAL_HEX_LEN {
        return Err(CredentialDefect::TooShort);
    }
    Ok(())
}

/// Device-installation secret, kept as the hex string it is persisted as.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct InstallationCredential(String);

impl InstallationCredential {
    pub fn from_hex(raw: &str) -> Result<Self, CredentialDefect> {
        validate_credential(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// 32 fresh random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex = hex::encode(bytes);
        bytes.zeroize();
        Self(hex)
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InstallationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstallationCredential(<{} hex digits>)", self.0.len())
    }
}

/// Per-wallet installation credential persistence with validation.
#[derive(Clone)]
pub struct InstallationKeyStore {
    kv: Arc<dyn KeyValueStore>,
}

impl InstallationKeyStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn probe(&self) -> bool {
        self.kv.probe()
    }

    /// Load the stored credential for `address`.
    ///
    /// A value that fails validation is deleted and reported as absent so the
    /// caller registers a fresh installation.
    pub fn load_validated(
        &self,
        address: &str,
    ) -> Result<Option<InstallationCredential>, StoreError> {
        let key = installation_key_name(address);
        let raw = match self.kv.get(&key)? {
            Some(raw) => Some(raw),
            None => self.migrate_legacy(address, &key)?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        match InstallationCredential::from_hex(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(defect) => {
                tracing::warn!(
                    address = %address.to_lowercase(),
                    %defect,
                    "discarding corrupted installation credential"
                );
                self.kv.remove(&key)?;
                Ok(None)
            }
        }
    }

    fn migrate_legacy(&self, address: &str, key: &str) -> Result<Option<String>, StoreError> {
        let legacy = legacy_key_name(address);
        let Some(raw) = self.kv.get(&legacy)? else {
            return Ok(None);
        };
        tracing::info!(address = %address.to_lowercase(), "migrating legacy installation key");
        self.kv.set(key, &raw)?;
        self.kv.remove(&legacy)?;
        Ok(Some(raw))
    }

    pub fn save(&self, address: &str, credential: &InstallationCredential) -> Result<(), StoreError> {
        self.kv
            .set(&installation_key_name(address), credential.as_hex())
    }

    /// Remove any stored credential. Returns whether one existed.
    pub fn clear(&self, address: &str) -> Result<bool, StoreError> {
        let mut existed = false;
        for key in [installation_key_name(address), legacy_key_name(address)] {
            if self.kv.get(&key)?.is_some() {
                self.kv.remove(&key)?;
                existed = true;
            }
        }
        if existed {
            tracing::info!(address = %address.to_lowercase(), "cleared local installation credential");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xAbCdEf0000000000000000000000000000000001";

    fn store() -> (Arc<MemoryKeyValueStore>, InstallationKeyStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        (kv.clone(), InstallationKeyStore::new(kv))
    }

    #[test]
    fn key_name_is_lowercase() {
        assert_eq!(
            installation_key_name(ADDR),
            "installation_key_0xabcdef0000000000000000000000000000000001"
        );
    }

    #[test]
    fn validation_rules() {
        assert_eq!(
            validate_credential(&"a".repeat(65)),
            Err(CredentialDefect::OddLength)
        );
        assert_eq!(
            validate_credential(&format!("{}zz", "a".repeat(64))),
            Err(CredentialDefect::NonHex)
        );
        assert_eq!(
            validate_credential(&"ab".repeat(31)),
            Err(CredentialDefect::TooShort)
        );
        assert_eq!(validate_credential(""), Err(CredentialDefect::TooShort));
        assert!(validate_credential(&"Ab".repeat(32)).is_ok());
        assert!(validate_credential(&"ab".repeat(40)).is_ok());
    }

    #[test]
    fn valid_credential_is_returned_unchanged() {
        let (kv, keys) = store();
        let raw = "AbCd".repeat(16);
        kv.set(&installation_key_name(ADDR), &raw).unwrap();
        let loaded = keys.load_validated(ADDR).unwrap().unwrap();
        assert_eq!(loaded.as_hex(), raw);
    }

    #[test]
    fn corrupted_credentials_are_removed() {
        for bad in ["abc", "0xnothex", &"ab".repeat(10)] {
            let (kv, keys) = store();
            let key = installation_key_name(ADDR);
            kv.set(&key, bad).unwrap();
            assert!(keys.load_validated(ADDR).unwrap().is_none());
            assert!(kv.get(&key).unwrap().is_none(), "{bad} should be removed");
        }
    }

    #[test]
    fn legacy_key_is_migrated() {
        let (kv, keys) = store();
        let raw = "ef".repeat(32);
        kv.set(&legacy_key_name(ADDR), &raw).unwrap();
        let loaded = keys.load_validated(ADDR).unwrap().unwrap();
        assert_eq!(loaded.as_hex(), raw);
        assert!(kv.get(&legacy_key_name(ADDR)).unwrap().is_none());
        assert_eq!(kv.get(&installation_key_name(ADDR)).unwrap(), Some(raw));
    }

    #[test]
    fn generate_save_clear() {
        let (_kv, keys) = store();
        let credential = InstallationCredential::generate();
        assert_eq!(credential.as_hex().len(), MIN_CREDENTIAL_HEX_LEN);
        keys.save(ADDR, &credential).unwrap();
        assert_eq!(keys.load_validated(ADDR).unwrap(), Some(credential));
        assert!(keys.clear(ADDR).unwrap());
        assert!(!keys.clear(ADDR).unwrap());
        assert!(keys.load_validated(ADDR).unwrap().is_none());
    }

    #[test]
    fn debug_redacts_secret() {
        let credential = InstallationCredential::generate();
        let printed = format!("{credential:?}");
        assert!(!printed.contains(credential.as_hex()));
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "12".repeat(32);
        {
            let kv = FileKeyValueStore::open(dir.path());
            assert!(kv.probe());
            kv.set("installation_key_0xabc", &raw).unwrap();
        }
        let kv = FileKeyValueStore::open(dir.path());
        assert_eq!(kv.get("installation_key_0xabc").unwrap(), Some(raw));
        kv.remove("installation_key_0xabc").unwrap();
        assert!(kv.get("installation_key_0xabc").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKeyValueStore::open(dir.path());
        kv.set("k", "v").unwrap();
        let meta = std::fs::metadata(kv.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn unavailable_memory_store_fails_probe() {
        assert!(!MemoryKeyValueStore::unavailable().probe());
    }
}
