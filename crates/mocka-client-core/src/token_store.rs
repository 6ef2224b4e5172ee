use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

const SESSION_SCHEMA_VERSION: u32 = 1;

/// The three persisted slots. Empty strings never make it in here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token store read failed: {0}")]
    Read(String),
    #[error("token store write failed: {0}")]
    Write(String),
    #[error("token store encode failed: {0}")]
    Encode(String),
}

/// Durable backing medium for [`TokenStore`].
pub trait TokenPersistence: Send + Sync {
    fn load(&self) -> Result<StoredSession, TokenStoreError>;
    fn persist(&self, session: &StoredSession) -> Result<(), TokenStoreError>;
}

/// Shared in-memory document. Clones point at the same slots, so reopening a
/// store over a clone behaves like a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    document: Arc<Mutex<StoredSession>>,
}

impl MemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            document: Arc::new(Mutex::new(session)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StoredSession {
        lock(&self.document).clone()
    }
}

impl TokenPersistence for MemoryPersistence {
    fn load(&self) -> Result<StoredSession, TokenStoreError> {
        Ok(self.snapshot())
    }

    fn persist(&self, session: &StoredSession) -> Result<(), TokenStoreError> {
        *lock(&self.document) = session.clone();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    version: u32,
    #[serde(flatten)]
    session: StoredSession,
}

/// Versioned JSON file on disk.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenPersistence for FilePersistence {
    fn load(&self) -> Result<StoredSession, TokenStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(StoredSession::default());
            }
            Err(error) => return Err(TokenStoreError::Read(error.to_string())),
        };
        match serde_json::from_str::<SessionDocument>(&raw) {
            Ok(document) if document.version == SESSION_SCHEMA_VERSION => Ok(document.session),
            Ok(document) => {
                tracing::warn!(
                    version = document.version,
                    path = %self.path.display(),
                    "Ignoring session file with unknown schema version"
                );
                Ok(StoredSession::default())
            }
            Err(error) => {
                tracing::warn!(error = %error, path = %self.path.display(), "Ignoring unreadable session file");
                Ok(StoredSession::default())
            }
        }
    }

    fn persist(&self, session: &StoredSession) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| TokenStoreError::Write(error.to_string()))?;
        }
        let encoded = serde_json::to_string_pretty(&SessionDocument {
            version: SESSION_SCHEMA_VERSION,
            session: session.clone(),
        })
        .map_err(|error| TokenStoreError::Encode(error.to_string()))?;

        // The file holds bearer credentials: owner-only, swapped in whole.
        let staging = staging_path(&self.path);
        fs::write(&staging, encoded).map_err(|error| TokenStoreError::Write(error.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o600))
                .map_err(|error| TokenStoreError::Write(error.to_string()))?;
        }
        fs::rename(&staging, &self.path).map_err(|error| TokenStoreError::Write(error.to_string()))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.to_path_buf();
    let extension = path
        .extension()
        .map(|ext| format!("{}.tmp", ext.to_string_lossy()))
        .unwrap_or_else(|| "tmp".to_string());
    staging.set_extension(extension);
    staging
}

/// What to do with the stored refresh token on [`TokenStore::set_tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenUpdate<'a> {
    /// Leave whatever is stored untouched.
    Keep,
    /// Overwrite the slot; `None` clears it.
    Replace(Option<&'a str>),
}

/// Payload handed to every listener after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChange {
    pub session: StoredSession,
}

pub type TokenListener = Arc<dyn Fn(&TokenChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Process-wide token slots with write-through persistence and a synchronous
/// change signal.
pub struct TokenStore {
    persistence: Box<dyn TokenPersistence>,
    state: Mutex<StoredSession>,
    listeners: Mutex<Vec<(ListenerId, TokenListener)>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TokenStore")
            .field("has_access_token", &state.access_token.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("full_name", &state.full_name)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn open(persistence: impl TokenPersistence + 'static) -> Result<Self, TokenStoreError> {
        let session = persistence.load()?;
        Ok(Self {
            persistence: Box::new(persistence),
            state: Mutex::new(session),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            persistence: Box::new(MemoryPersistence::new()),
            state: Mutex::new(StoredSession::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn set_tokens(
        &self,
        access_token: Option<&str>,
        refresh_token: RefreshTokenUpdate<'_>,
    ) -> Result<(), TokenStoreError> {
        self.update(|session| {
            session.access_token = non_empty(access_token);
            if let RefreshTokenUpdate::Replace(refresh_token) = refresh_token {
                session.refresh_token = non_empty(refresh_token);
            }
        })
    }

    /// Overwrites all three slots in one write, so either every slot changes
    /// or none does.
    pub fn replace_session(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<(), TokenStoreError> {
        self.update(|session| {
            session.access_token = non_empty(access_token);
            session.refresh_token = non_empty(refresh_token);
            session.full_name = non_empty(full_name);
        })
    }

    /// Clears both tokens. The display name is left alone.
    pub fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        self.update(|session| {
            session.access_token = None;
            session.refresh_token = None;
        })
    }

    pub fn set_full_name(&self, full_name: Option<&str>) -> Result<(), TokenStoreError> {
        self.update(|session| session.full_name = non_empty(full_name))
    }

    pub fn clear_full_name(&self) -> Result<(), TokenStoreError> {
        self.update(|session| session.full_name = None)
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        lock(&self.state).access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        lock(&self.state).refresh_token.clone()
    }

    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        lock(&self.state).full_name.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> StoredSession {
        lock(&self.state).clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TokenChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    // A failed persist leaves both the durable copy and the in-memory slots
    // as they were, and no listener fires.
    fn update(&self, apply: impl FnOnce(&mut StoredSession)) -> Result<(), TokenStoreError> {
        let change = {
            let mut state = lock(&self.state);
            let mut next = state.clone();
            apply(&mut next);
            if let Err(error) = self.persistence.persist(&next) {
                tracing::warn!(error = %error, "Token store write failed");
                return Err(error);
            }
            *state = next.clone();
            TokenChange { session: next }
        };
        self.notify(&change);
        Ok(())
    }

    fn notify(&self, change: &TokenChange) {
        let listeners = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(change);
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|value| !value.is_empty()).map(str::to_string)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
