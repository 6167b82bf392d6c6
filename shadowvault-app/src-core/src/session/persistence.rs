//! Session persistence between process runs.
//!
//! The session (tokens plus identity) is stored in `session.json` inside the
//! data directory with owner-only permissions. Callers treat every failure
//! here as "no session": a broken file never blocks sign-in or sign-out.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::auth::Session;
use crate::error::{Result, ShadowVaultError};
use crate::storage::DataDir;

/// File name for the persisted session.
const SESSION_FILE: &str = "session.json";

pub trait SessionStorage: Send + Sync {
    /// Returns `None` when nothing is stored.
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    /// Idempotent.
    fn clear(&self) -> Result<()>;
}

pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(dir: &DataDir) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ShadowVaultError::Storage(format!("Failed to read session file: {}", e))
        })?;

        let session: Session = serde_json::from_str(&content).map_err(|e| {
            ShadowVaultError::Storage(format!("Failed to parse session file: {}", e))
        })?;

        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let content = serde_json::to_string_pretty(session).map_err(|e| {
            ShadowVaultError::Storage(format!("Failed to serialize session: {}", e))
        })?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(|e| {
            ShadowVaultError::Storage(format!("Failed to open session file: {}", e))
        })?;
        file.write_all(content.as_bytes()).map_err(|e| {
            ShadowVaultError::Storage(format!("Failed to write session file: {}", e))
        })?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                ShadowVaultError::Storage(format!("Failed to delete session file: {}", e))
            })?;
        }
        Ok(())
    }
}

/// Keeps the session in process memory only.
#[derive(Default)]
pub struct MemorySessionStorage {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    pub fn stored(&self) -> Option<Session> {
        self.slot.lock().clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}
