use serde::Serialize;

use crate::error::ShadowVaultError;
use crate::routing::{RouteState, Surface};
use crate::secrets::{ListSnapshot, SyncStatus};

/// Events published to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum UiEvent {
    RouteChanged {
        state: RouteState,
        surface: Surface,
        /// Surface the guard navigated away from, when it forced a redirect.
        redirected_from: Option<Surface>,
    },
    SecretsUpdated(ListSnapshot),
    SyncStatusChanged(SyncStatus),
    SignedUp {
        email: String,
    },
    AccountDeleted,
    Error {
        code: String,
        message: String,
    },
}

impl UiEvent {
    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RouteChanged { .. } => "route-changed",
            Self::SecretsUpdated(_) => "secrets-updated",
            Self::SyncStatusChanged(_) => "sync-status-changed",
            Self::SignedUp { .. } => "signed-up",
            Self::AccountDeleted => "account-deleted",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&ShadowVaultError> for UiEvent {
    fn from(err: &ShadowVaultError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
