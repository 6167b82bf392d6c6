//! Session and identity types.
//!
//! `AuthState` is the value carried by the session event stream. It moves
//! through these states:
//! - `Resolving` → `SignedIn` / `SignedOut` (once, after the persisted session is read)
//! - `SignedOut` → `SignedIn` (after a successful sign-in)
//! - `SignedIn` → `SignedOut` (sign-out, account deletion, rejected refresh)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, ShadowVaultError};

/// Backend-assigned owner reference for a session and for every secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Proof of authentication held by the session store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.user
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// True when the access token expires within `margin` from now.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at <= Utc::now() + margin
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The persisted session has not been read yet.
    #[default]
    Resolving,
    SignedOut,
    SignedIn(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Resolving)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolving => write!(f, "Resolving"),
            Self::SignedOut => write!(f, "SignedOut"),
            Self::SignedIn(session) => write!(f, "SignedIn({})", session.user.id),
        }
    }
}

/// Email/password pair submitted to sign-in and sign-up.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    /// Both fields are required before anything goes over the wire.
    pub fn validate(&self) -> Result<()> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(ShadowVaultError::Validation(
                "Both email and password are required.".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful sign-up. The account still has to be verified
/// out of band, so no session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignUpOutcome {
    VerificationPending { email: String },
}

#[cfg(test)]
pub(crate) fn test_session(user_id: &str, ttl: Duration) -> Session {
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        expires_at: Utc::now() + ttl,
        user: Identity {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
        },
    }
}
