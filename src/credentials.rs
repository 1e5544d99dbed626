//! Access/refresh token pair and user profile persistence.
//!
//! A [`CredentialStore`] owns the active session. Reads apply lazy expiry: an
//! expired access token reads as absent from [`CredentialStore::get`] but stays
//! stored (its refresh token is still needed) until replaced or cleared.

use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// An access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, Unix epoch milliseconds
    pub expires_at_epoch_ms: u64,
}

impl Credentials {
    /// Returns `true` once `now >= expires_at_epoch_ms`.
    pub fn is_expired(&self) -> bool {
        now_epoch_ms() >= self.expires_at_epoch_ms
    }
}

/// The signed-in user, set and cleared together with [`Credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl AuthenticatedUser {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Everything a store persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub credentials: Credentials,
    pub user: AuthenticatedUser,
}

/// Durable storage for the active session.
///
/// Implementations persist synchronously before returning, so a fresh store
/// opened over the same medium observes the latest state. A corrupt payload
/// must read as "no session" rather than fail.
pub trait CredentialStore: Send + Sync {
    /// The stored session, expired or not.
    fn load(&self) -> Option<StoredSession>;

    /// Replaces the stored session.
    fn set(&self, credentials: Credentials, user: AuthenticatedUser) -> Result<()>;

    /// Forgets the stored session.
    fn clear(&self) -> Result<()>;

    /// The stored credentials, or `None` if absent or expired.
    fn get(&self) -> Option<Credentials> {
        self.load()
            .map(|session| session.credentials)
            .filter(|credentials| !credentials.is_expired())
    }

    fn get_user(&self) -> Option<AuthenticatedUser> {
        self.load().map(|session| session.user)
    }
}

/// Process-local store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.session.lock().clone()
    }

    fn set(&self, credentials: Credentials, user: AuthenticatedUser) -> Result<()> {
        *self.session.lock() = Some(StoredSession { credentials, user });
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock() = None;
        Ok(())
    }
}

/// Store backed by a JSON file.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so readers never see a half-written session.
///
/// # Examples
///
/// ```no_run
/// use gridgate::credentials::{CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::open("/var/lib/dashboard/session.json");
/// if let Some(user) = store.get_user() {
///     println!("Signed in as {}", user.display_name);
/// }
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    session: Mutex<Option<StoredSession>>,
}

impl FileCredentialStore {
    /// Opens the store, reading any session already on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = read_session(&path);
        Self {
            path,
            session: Mutex::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, session: &StoredSession) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| Error::Storage(format!("Failed to encode session: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.session.lock().clone()
    }

    fn set(&self, credentials: Credentials, user: AuthenticatedUser) -> Result<()> {
        let session = StoredSession { credentials, user };
        let mut current = self.session.lock();
        self.write(&session)?;
        *current = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut current = self.session.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to remove {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
        *current = None;
        Ok(())
    }
}

fn read_session(path: &Path) -> Option<StoredSession> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read stored session");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Ignoring malformed stored session"
            );
            None
        }
    }
}

/// Current time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
