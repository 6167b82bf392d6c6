//! Boundary to the hosted backend: an auth API and a secrets table API.
//!
//! `RestBackend` speaks the HTTP wire format; `MemoryBackend` implements the
//! same contract in process, including per-owner scoping of secrets.

use async_trait::async_trait;
use thiserror::Error;

use crate::secrets::{NewSecret, Secret, SecretId};
use crate::session::{Credentials, Identity, Session};

pub mod memory;
pub mod rest;

pub use memory::{MemoryBackend, Operation};
pub use rest::RestBackend;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Missing, expired or revoked token.
    #[error("{0}")]
    Unauthorized(String),

    /// The backend answered with an error body.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Human-readable message, surfaced to the user as-is.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Registers the account. Verification happens out of band.
    async fn sign_up(&self, credentials: &Credentials, redirect_to: Option<&str>)
        -> BackendResult<()>;

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session>;

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session>;

    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    /// "Who am I": `None` when the token no longer maps to a user.
    async fn current_identity(&self, access_token: &str) -> BackendResult<Option<Identity>>;
}

#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Secrets owned by the token's identity, newest first.
    async fn list_secrets(&self, access_token: &str) -> BackendResult<Vec<Secret>>;

    async fn insert_secret(&self, access_token: &str, secret: &NewSecret) -> BackendResult<()>;

    /// Deleting an id that matches nothing is not an error.
    async fn delete_secret(&self, access_token: &str, id: SecretId) -> BackendResult<()>;

    /// Privileged procedure removing the identity and every secret it owns.
    async fn delete_account(&self, access_token: &str) -> BackendResult<()>;
}

pub trait Backend: AuthBackend + SecretsBackend {}

impl<T: AuthBackend + SecretsBackend> Backend for T {}
