use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{Result, ShadowVaultError};

/// Directory holding settings and the persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use `root` as the data directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The platform data directory (e.g. `~/.local/share/shadowvault` on Linux).
    pub fn platform_default() -> Result<Self> {
        let dirs = ProjectDirs::from("dev", "ShadowVault", "shadowvault").ok_or_else(|| {
            ShadowVaultError::Storage("Could not determine data directory".into())
        })?;
        Self::new(dirs.data_dir())
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}
