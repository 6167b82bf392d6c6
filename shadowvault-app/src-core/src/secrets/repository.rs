use std::sync::Arc;

use tracing::{debug, warn};

use super::model::{sort_newest_first, NewSecret, Secret, SecretId};
use crate::backend::Backend;
use crate::error::{Result, ShadowVaultError};
use crate::session::SessionStore;

/// Remote `secrets` collection, scoped to whoever holds the session.
///
/// No retries and no local caching: every call is one round trip (two for
/// `create`, which resolves the identity first).
pub struct SecretsRepository {
    backend: Arc<dyn Backend>,
    sessions: Arc<SessionStore>,
}

impl SecretsRepository {
    pub fn new(backend: Arc<dyn Backend>, sessions: Arc<SessionStore>) -> Self {
        Self { backend, sessions }
    }

    /// All secrets of the current identity, newest first.
    pub async fn list(&self) -> Result<Vec<Secret>> {
        let token = self.sessions.access_token()?;
        let mut secrets = self
            .backend
            .list_secrets(&token)
            .await
            .map_err(ShadowVaultError::fetch)?;
        sort_newest_first(&mut secrets);
        debug!("Fetched {} secrets", secrets.len());
        Ok(secrets)
    }

    /// Stores a new secret owned by the identity the backend reports for the
    /// current token.
    pub async fn create(&self, title: &str, value: &str) -> Result<()> {
        if title.trim().is_empty() || value.is_empty() {
            return Err(ShadowVaultError::Validation(
                "Please enter both Title and Secret Value.".into(),
            ));
        }

        let token = self.sessions.access_token()?;
        let owner = self
            .backend
            .current_identity(&token)
            .await
            .map_err(ShadowVaultError::mutation)?
            .ok_or_else(|| ShadowVaultError::Auth("No user logged in".into()))?;

        let row = NewSecret {
            title: title.trim().to_string(),
            value: value.to_string(),
            user_id: owner.id,
        };
        self.backend
            .insert_secret(&token, &row)
            .await
            .map_err(|e| {
                warn!("Failed to store secret: {}", e);
                ShadowVaultError::mutation(e)
            })
    }

    /// Removes a secret. An id that matches nothing is not an error.
    pub async fn delete(&self, id: SecretId) -> Result<()> {
        let token = self.sessions.access_token()?;
        self.backend
            .delete_secret(&token, id)
            .await
            .map_err(|e| {
                warn!("Failed to delete secret {}: {}", id, e);
                ShadowVaultError::mutation(e)
            })
    }
}
