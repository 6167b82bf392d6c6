//! Irreversible account deletion.
//!
//! Deletion is two-step: [`AccountLifecycle::request_deletion`] hands out a
//! short-lived [`DeletionRequest`], and only [`AccountLifecycle::confirm`]
//! with that request's id reaches the backend. The backend procedure removes
//! the identity and every secret it owns; the client never deletes secrets
//! itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, ShadowVaultError};
use crate::session::SessionStore;

/// Label of the control that confirms deletion. Kept distinct from every
/// navigation label.
pub const CONFIRM_LABEL: &str = "CONFIRM_DELETION";

const DELETION_WARNING: &str =
    "This permanently deletes your account and every secret in it. This cannot be undone.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub request_id: Uuid,
    /// Identity the request was issued for.
    pub user_id: String,
    pub warning: String,
    pub confirm_label: String,
    pub created_at: DateTime<Utc>,
}

impl DeletionRequest {
    fn new(user_id: String) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id,
            warning: DELETION_WARNING.to_string(),
            confirm_label: CONFIRM_LABEL.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let duration = Utc::now().signed_duration_since(self.created_at);
        duration.num_minutes() >= 5 // 5 minute timeout
    }
}

pub struct AccountLifecycle {
    backend: Arc<dyn Backend>,
    sessions: Arc<SessionStore>,
    pending: Mutex<Vec<DeletionRequest>>,
}

impl AccountLifecycle {
    pub fn new(backend: Arc<dyn Backend>, sessions: Arc<SessionStore>) -> Self {
        Self {
            backend,
            sessions,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// First step. Requires a session.
    pub fn request_deletion(&self) -> Result<DeletionRequest> {
        let session = self
            .sessions
            .session()
            .ok_or_else(|| ShadowVaultError::Auth("No user logged in".into()))?;

        let request = DeletionRequest::new(session.user.id);
        let mut pending = self.pending.lock();
        pending.retain(|r| !r.is_expired());
        pending.push(request.clone());
        info!("Account deletion requested ({})", request.request_id);
        Ok(request)
    }

    /// Abort path. Returns whether a pending request was dropped.
    pub fn abort(&self, request_id: Uuid) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|r| r.request_id != request_id);
        let removed = pending.len() != before;
        if removed {
            info!("Account deletion cancelled ({})", request_id);
        }
        removed
    }

    /// Second step. On success the local session is ended as well; on
    /// failure the account and the session are left intact.
    pub async fn confirm(&self, request_id: Uuid) -> Result<()> {
        let request = {
            let mut pending = self.pending.lock();
            let idx = pending.iter().position(|r| r.request_id == request_id);
            idx.map(|i| pending.swap_remove(i))
        };

        let request = match request {
            Some(r) if !r.is_expired() => r,
            _ => {
                return Err(ShadowVaultError::Validation(
                    "Deletion request not found or expired".into(),
                ))
            }
        };

        let session = self
            .sessions
            .session()
            .ok_or_else(|| ShadowVaultError::Auth("No user logged in".into()))?;
        if session.user.id != request.user_id {
            return Err(ShadowVaultError::Validation(
                "Deletion request belongs to a different account".into(),
            ));
        }

        if let Err(e) = self.backend.delete_account(&session.access_token).await {
            warn!("Account purge failed: {}", e);
            return Err(ShadowVaultError::Mutation(format!(
                "Failed to purge account: {}",
                e.message()
            )));
        }

        info!("Account {} deleted", request.user_id);
        self.sessions.end_local();
        Ok(())
    }
}
