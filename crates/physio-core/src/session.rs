//! Client-side session state.
//!
//! A [`SessionManager`] is the only place that knows who is signed in. It
//! persists through a pluggable [`SessionStore`] and checks expiry every time
//! the session is read, clearing it once it has lapsed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Session;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session file error: {0}")]
    Io(#[from] io::Error),

    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Where the current session is kept between reads.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> SessionResult<Option<Session>>;
    fn save(&self, session: &Session) -> SessionResult<()>;
    fn clear(&self) -> SessionResult<()>;
}

/// Keeps the session for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> SessionResult<Option<Session>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &Session) -> SessionResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Persists the session as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> SessionResult<Option<Session>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> SessionResult<()> {
        // Write then rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Explicit login/logout transitions over a [`SessionStore`].
pub struct SessionManager<S: SessionStore> {
    store: S,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn login(&self, session: Session) -> SessionResult<()> {
        self.store.save(&session)?;
        info!(subject_id = %session.subject_id, kind = %session.kind, "session started");
        Ok(())
    }

    pub fn logout(&self) -> SessionResult<()> {
        self.store.clear()?;
        info!("session ended");
        Ok(())
    }

    /// The live session, if any.
    pub fn current(&self) -> SessionResult<Option<Session>> {
        self.current_at(Utc::now())
    }

    /// The session as of `now`; an expired one is cleared and reads as absent.
    pub fn current_at(&self, now: DateTime<Utc>) -> SessionResult<Option<Session>> {
        match self.store.load()? {
            Some(session) if session.is_expired_at(now) => {
                debug!(subject_id = %session.subject_id, "clearing expired session");
                self.store.clear()?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn token(&self) -> SessionResult<Option<String>> {
        Ok(self.current()?.map(|s| s.token))
    }

    pub fn is_authenticated(&self) -> SessionResult<bool> {
        Ok(self.current()?.is_some())
    }
}
