//! Visitor session: the durable identity token and its in-memory mirror
//!
//! [`SessionStore`] is the only holder of the active [`Identity`]. Other
//! components read it through [`SessionStore::get`] or commit results under
//! [`SessionStore::with_current`] instead of caching their own copy.

use pds_common::events::{ClientEvent, EventBus};
use pds_common::Identity;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Durable key holding the identity token
pub const SESSION_KEY: &str = "pds_web_id";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session file: {0}")]
    Corrupt(String),
}

/// Durable storage for the identity token
pub trait SessionRepository: Send + Sync {
    fn load(&self) -> Result<Option<Identity>, SessionError>;
    fn save(&self, identity: &Identity) -> Result<(), SessionError>;
    fn remove(&self) -> Result<(), SessionError>;
}

/// JSON document on disk: `{ "pds_web_id": "<token>" }`
pub struct FileSessionRepository {
    path: PathBuf,
}

impl FileSessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionRepository for FileSessionRepository {
    fn load(&self) -> Result<Option<Identity>, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: Map<String, Value> =
            serde_json::from_str(&content).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        Ok(document
            .get(SESSION_KEY)
            .and_then(Value::as_str)
            .and_then(Identity::new))
    }

    fn save(&self, identity: &Identity) -> Result<(), SessionError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut document = Map::new();
        document.insert(SESSION_KEY.to_string(), Value::String(identity.to_string()));
        let content =
            serde_json::to_vec_pretty(&document).map_err(|e| SessionError::Corrupt(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written token
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, &content)?;
        tmp.persist(&self.path).map_err(|e| SessionError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Non-durable repository for tests and ephemeral runs
#[derive(Default)]
pub struct MemorySessionRepository {
    slot: Mutex<Option<Identity>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }

    /// Value currently held in "durable" storage
    pub fn stored(&self) -> Option<Identity> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SessionRepository for MemorySessionRepository {
    fn load(&self) -> Result<Option<Identity>, SessionError> {
        Ok(self.stored())
    }

    fn save(&self, identity: &Identity) -> Result<(), SessionError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(())
    }

    fn remove(&self) -> Result<(), SessionError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

impl<T: SessionRepository + ?Sized> SessionRepository for Arc<T> {
    fn load(&self) -> Result<Option<Identity>, SessionError> {
        (**self).load()
    }

    fn save(&self, identity: &Identity) -> Result<(), SessionError> {
        (**self).save(identity)
    }

    fn remove(&self) -> Result<(), SessionError> {
        (**self).remove()
    }
}

/// Reacts to the end of a session
///
/// Called synchronously while the session lock is held, so implementations
/// must not call back into the [`SessionStore`].
pub trait SessionListener: Send + Sync {
    fn on_session_cleared(&self);
}

/// Single source of truth for "who is this visitor"
pub struct SessionStore {
    repository: Box<dyn SessionRepository>,
    current: Mutex<Option<Identity>>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    events: EventBus,
}

impl SessionStore {
    pub fn new(repository: impl SessionRepository + 'static, events: EventBus) -> Self {
        Self {
            repository: Box::new(repository),
            current: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Identity>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the persisted identity into memory (startup)
    ///
    /// Unreadable storage is logged and treated as "no identity".
    pub fn restore(&self) -> Option<Identity> {
        let mut current = self.lock();
        match self.repository.load() {
            Ok(identity) => {
                if let Some(id) = &identity {
                    info!(identity = %id, "Restored persisted identity");
                }
                *current = identity.clone();
                identity
            }
            Err(e) => {
                warn!("Persisted identity unreadable, starting without one: {}", e);
                *current = None;
                None
            }
        }
    }

    pub fn get(&self) -> Option<Identity> {
        self.lock().clone()
    }

    pub fn is_current(&self, identity: &Identity) -> bool {
        self.lock().as_ref() == Some(identity)
    }

    /// Persist and activate an identity
    ///
    /// Storage and memory are updated under one lock; on a storage failure
    /// neither changes.
    pub fn set(&self, identity: Identity) -> Result<(), SessionError> {
        {
            let mut current = self.lock();
            self.repository.save(&identity)?;
            *current = Some(identity.clone());
        }
        debug!(identity = %identity, "Session identity set");
        self.events
            .emit_lossy(ClientEvent::SessionEstablished { identity });
        Ok(())
    }

    /// End the session: remove the persisted token and reset dependents
    pub fn clear(&self) -> Result<(), SessionError> {
        {
            let mut current = self.lock();
            self.repository.remove()?;
            *current = None;

            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for listener in listeners.iter() {
                listener.on_session_cleared();
            }
        }
        info!("Session cleared");
        self.events.emit_lossy(ClientEvent::SessionCleared);
        Ok(())
    }

    /// Run `f` against the current identity while holding the session lock
    ///
    /// Used for guarded commits: nothing can set or clear the session until
    /// `f` returns.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&Identity>) -> R) -> R {
        let current = self.lock();
        f(current.as_ref())
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}
