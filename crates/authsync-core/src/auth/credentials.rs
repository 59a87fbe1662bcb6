use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "authsync";

/// The two credentials a session persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialName {
    Access,
    Refresh,
}

impl CredentialName {
    pub const ALL: [CredentialName; 2] = [CredentialName::Access, CredentialName::Refresh];

    /// Storage key, shared by every context using the same store.
    pub fn key(self) -> &'static str {
        match self {
            CredentialName::Access => "access-token",
            CredentialName::Refresh => "refresh-token",
        }
    }
}

/// Expiry and scope metadata attached to a stored credential, cookie style.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialOptions {
    pub max_age: Duration,
    pub path: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write credential {name}: {reason}")]
    Write { name: &'static str, reason: String },
}

/// Abstract storage for the access and refresh credentials.
///
/// A missing, unreadable, or expired credential reads as `None`; absence
/// means "not authenticated" and is never an error.
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: CredentialName) -> Option<String>;

    fn set(
        &self,
        name: CredentialName,
        value: &str,
        options: &CredentialOptions,
    ) -> Result<(), StoreError>;

    fn clear(&self, name: CredentialName) -> Result<(), StoreError>;
}

/// A credential as persisted by the file and keyring backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    value: String,
    path: String,
    expires_at: DateTime<Utc>,
}

impl StoredCredential {
    fn new(
        name: CredentialName,
        value: &str,
        options: &CredentialOptions,
    ) -> Result<Self, StoreError> {
        let expires_at = Utc::now()
            .checked_add_signed(options.max_age)
            .ok_or_else(|| StoreError::Write {
                name: name.key(),
                reason: format!("max age {} is out of range", options.max_age),
            })?;
        Ok(Self {
            value: value.to_string(),
            path: options.path.clone(),
            expires_at,
        })
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    fn live_value(self) -> Option<String> {
        if self.is_expired() {
            None
        } else {
            Some(self.value)
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process store. Clones share the same entries, so several contexts
/// handed clones of one store observe each other's writes.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    entries: Arc<Mutex<BTreeMap<CredentialName, StoredCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, name: CredentialName) -> Option<String> {
        let entries = self.entries.lock();
        entries.get(&name).cloned().and_then(StoredCredential::live_value)
    }

    fn set(
        &self,
        name: CredentialName,
        value: &str,
        options: &CredentialOptions,
    ) -> Result<(), StoreError> {
        let stored = StoredCredential::new(name, value, options)?;
        self.entries.lock().insert(name, stored);
        Ok(())
    }

    fn clear(&self, name: CredentialName) -> Result<(), StoreError> {
        self.entries.lock().remove(&name);
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON file store shared by every process pointed at the same path.
///
/// Each write is a read-modify-write of the whole file; concurrent writers
/// from different processes resolve last-writer-wins.
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write within this process
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, StoredCredential>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.path.display(), e)))
    }

    fn write_all(
        &self,
        name: CredentialName,
        entries: &BTreeMap<String, StoredCredential>,
    ) -> Result<(), StoreError> {
        let to_write_error = |e: String| StoreError::Write {
            name: name.key(),
            reason: e,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| to_write_error(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(entries).map_err(|e| to_write_error(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| to_write_error(e.to_string()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, name: CredentialName) -> Option<String> {
        let _guard = self.lock.lock();
        match self.read_all() {
            Ok(mut entries) => entries
                .remove(name.key())
                .and_then(StoredCredential::live_value),
            Err(e) => {
                warn!(error = %e, credential = name.key(), "Failed to read credential file");
                None
            }
        }
    }

    fn set(
        &self,
        name: CredentialName,
        value: &str,
        options: &CredentialOptions,
    ) -> Result<(), StoreError> {
        let stored = StoredCredential::new(name, value, options)?;
        let _guard = self.lock.lock();
        // A corrupt file is replaced rather than blocking sign-in
        let mut entries = self.read_all().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable credential file");
            BTreeMap::new()
        });
        entries.insert(name.key().to_string(), stored);
        self.write_all(name, &entries)?;
        debug!(credential = name.key(), path = %self.path.display(), "Credential written");
        Ok(())
    }

    fn clear(&self, name: CredentialName) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable credential file");
                BTreeMap::new()
            }
        };
        if entries.remove(name.key()).is_none() {
            return Ok(());
        }
        self.write_all(name, &entries)
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// Credential store backed by the OS keychain.
///
/// Which keychain is used depends on the platform features `keyring` is
/// built with. This crate enables none of them, so by default `keyring`
/// falls back to its mock store: every `Entry` is fresh, writes do not
/// persist, and `get` after `set` reads as absent. An application wanting
/// real persistence enables e.g. `apple-native`, `windows-native` or
/// `sync-secret-service` on its own `keyring` dependency, which Cargo
/// unifies with this one.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, name: CredentialName) -> Result<Entry, StoreError> {
        Entry::new(&self.service, name.key())
            .map_err(|e| StoreError::Unavailable(format!("Failed to access keyring: {}", e)))
    }

    /// Check if keyring is available on this system
    pub fn is_available(&self) -> bool {
        match self.entry(CredentialName::Access) {
            Ok(entry) => matches!(entry.get_password(), Ok(_) | Err(keyring::Error::NoEntry)),
            Err(_) => false,
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, name: CredentialName) -> Option<String> {
        let entry = match self.entry(name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, credential = name.key(), "Keyring unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(json) => match serde_json::from_str::<StoredCredential>(&json) {
                Ok(stored) => stored.live_value(),
                Err(e) => {
                    warn!(error = %e, credential = name.key(), "Ignoring malformed keyring entry");
                    None
                }
            },
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, credential = name.key(), "Failed to read keyring entry");
                None
            }
        }
    }

    fn set(
        &self,
        name: CredentialName,
        value: &str,
        options: &CredentialOptions,
    ) -> Result<(), StoreError> {
        let stored = StoredCredential::new(name, value, options)?;
        let json = serde_json::to_string(&stored).map_err(|e| {
            StoreError::Write {
                name: name.key(),
                reason: e.to_string(),
            }
        })?;
        self.entry(name)?
            .set_password(&json)
            .map_err(|e| StoreError::Write {
                name: name.key(),
                reason: e.to_string(),
            })
    }

    fn clear(&self, name: CredentialName) -> Result<(), StoreError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(StoreError::Write {
                name: name.key(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Clear both credentials, attempting each even if one fails.
pub(crate) fn clear_all(store: &dyn CredentialStore) -> Result<(), StoreError> {
    let mut first_error = None;
    for name in CredentialName::ALL {
        if let Err(e) = store.clear(name) {
            warn!(error = %e, credential = name.key(), "Failed to clear credential");
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
