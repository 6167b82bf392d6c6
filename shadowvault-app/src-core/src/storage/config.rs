use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use url::Url;

use super::paths::DataDir;
use crate::error::{Result, ShadowVaultError};

const SETTINGS_FILE: &str = "settings.json";

pub const BACKEND_URL_ENV: &str = "SHADOWVAULT_BACKEND_URL";
pub const ANON_KEY_ENV: &str = "SHADOWVAULT_ANON_KEY";

/// Local development address of a self-hosted backend stack.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub backend_url: String,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
    /// Where the verification email sends the user after sign-up.
    pub email_redirect_to: Option<String>,
    /// Refresh the access token when it expires within this many seconds.
    pub refresh_margin_secs: u64,
    pub refresh_interval_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            anon_key: String::new(),
            email_redirect_to: None,
            refresh_margin_secs: 60,
            refresh_interval_secs: 30,
        }
    }
}

impl AppSettings {
    /// Apply `SHADOWVAULT_BACKEND_URL` / `SHADOWVAULT_ANON_KEY` on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(BACKEND_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(key) = lookup(ANON_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.anon_key = key.trim().to_string();
        }
        self
    }

    /// Parsed backend URL, normalized to end with `/` so relative joins keep
    /// any path prefix.
    pub fn backend_base_url(&self) -> Result<Url> {
        let mut raw = self.backend_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| {
            ShadowVaultError::Config(format!("Invalid backend URL {:?}: {}", self.backend_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ShadowVaultError::Config(format!(
                "Backend URL must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        self.backend_base_url()?;
        if self.anon_key.trim().is_empty() {
            return Err(ShadowVaultError::Config(format!(
                "Backend API key missing. Set {} or anon_key in {}",
                ANON_KEY_ENV, SETTINGS_FILE
            )));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ShadowVaultError::Config(
                "refresh_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn get_settings_path(dir: &DataDir) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

/// Load settings from the data directory, falling back to defaults, then
/// apply environment overrides.
pub fn load_settings(dir: &DataDir) -> Result<AppSettings> {
    let path = get_settings_path(dir);

    let settings = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)?
    } else {
        debug!("No settings file at {:?}, using defaults", path);
        AppSettings::default()
    };

    Ok(settings.with_env_overrides())
}

pub fn save_settings(dir: &DataDir, settings: &AppSettings) -> Result<()> {
    let path = get_settings_path(dir);
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, content)?;
    Ok(())
}
