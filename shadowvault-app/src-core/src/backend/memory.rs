use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{AuthBackend, BackendError, BackendResult, SecretsBackend};
use crate::secrets::{sort_newest_first, NewSecret, Secret, SecretId};
use crate::session::{Credentials, Identity, Session};

/// Backend calls, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignUp,
    SignIn,
    Refresh,
    SignOut,
    CurrentIdentity,
    ListSecrets,
    InsertSecret,
    DeleteSecret,
    DeleteAccount,
}

struct UserRecord {
    id: String,
    email: String,
    password: String,
    confirmed: bool,
}

struct StoredSecret {
    secret: Secret,
    owner: String,
}

struct AccessGrant {
    user_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    access_tokens: HashMap<String, AccessGrant>,
    refresh_tokens: HashMap<String, String>,
    secrets: Vec<StoredSecret>,
    next_secret_id: SecretId,
    failures: HashMap<Operation, BackendError>,
    calls: HashMap<Operation, usize>,
}

impl Inner {
    fn record(&mut self, op: Operation) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn authenticate(&self, access_token: &str) -> BackendResult<String> {
        let grant = self
            .access_tokens
            .get(access_token)
            .ok_or_else(|| BackendError::Unauthorized("Invalid JWT".into()))?;
        if grant.expires_at <= Utc::now() {
            return Err(BackendError::Unauthorized("JWT expired".into()));
        }
        Ok(grant.user_id.clone())
    }

    fn user_by_id(&self, user_id: &str) -> Option<&UserRecord> {
        self.users.values().find(|u| u.id == user_id)
    }

    fn issue_session(&mut self, user_id: &str, ttl: Duration) -> BackendResult<Session> {
        let user = self
            .user_by_id(user_id)
            .ok_or_else(|| BackendError::Unauthorized("User not found".into()))?;
        let identity = Identity {
            id: user.id.clone(),
            email: Some(user.email.clone()),
        };
        let access_token = Uuid::new_v4().to_string();
        let refresh_token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + ttl;

        self.access_tokens.insert(
            access_token.clone(),
            AccessGrant {
                user_id: identity.id.clone(),
                expires_at,
            },
        );
        self.refresh_tokens
            .insert(refresh_token.clone(), identity.id.clone());

        Ok(Session {
            access_token,
            refresh_token,
            expires_at,
            user: identity,
        })
    }

    fn revoke_user_tokens(&mut self, user_id: &str) {
        self.access_tokens.retain(|_, grant| grant.user_id != user_id);
        self.refresh_tokens.retain(|_, owner| owner != user_id);
    }
}

/// In-process backend with the same observable contract as the hosted one:
/// secrets are scoped to the token's identity, ids increase monotonically,
/// deletes of unknown ids succeed, and account deletion removes the identity
/// and its secrets in one step.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    token_ttl: Duration,
    require_confirmation: bool,
    latency: Option<std::time::Duration>,
}

impl MemoryBackend {
    /// Accounts are usable right after sign-up.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            token_ttl: Duration::hours(1),
            require_confirmation: false,
            latency: None,
        }
    }

    /// Accounts must be confirmed with [`MemoryBackend::confirm_email`]
    /// before sign-in succeeds.
    pub fn with_email_confirmation() -> Self {
        Self {
            require_confirmation: true,
            ..Self::new()
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Every call sleeps this long before touching state, so callers
    /// observe a real suspension point.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn confirm_email(&self, email: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.users.get_mut(&email.to_lowercase()) {
            Some(user) => {
                user.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: Operation, err: BackendError) {
        self.inner.lock().failures.insert(op, err);
    }

    /// How many times `op` reached the backend (including injected failures).
    pub fn calls(&self, op: Operation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn user_exists(&self, email: &str) -> bool {
        self.inner.lock().users.contains_key(&email.to_lowercase())
    }

    /// Server-side view of one identity's collection, newest first.
    pub fn secrets_for(&self, user_id: &str) -> Vec<Secret> {
        let inner = self.inner.lock();
        let mut secrets: Vec<Secret> = inner
            .secrets
            .iter()
            .filter(|s| s.owner == user_id)
            .map(|s| s.secret.clone())
            .collect();
        sort_newest_first(&mut secrets);
        secrets
    }

    /// Invalidate every token of a user, as an admin action would.
    pub fn revoke_sessions(&self, user_id: &str) {
        self.inner.lock().revoke_user_tokens(user_id);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(
        &self,
        credentials: &Credentials,
        _redirect_to: Option<&str>,
    ) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::SignUp)?;

        let key = credentials.email.to_lowercase();
        if inner.users.contains_key(&key) {
            return Err(BackendError::Rejected {
                status: 422,
                message: "User already registered".into(),
            });
        }
        inner.users.insert(
            key,
            UserRecord {
                id: Uuid::new_v4().to_string(),
                email: credentials.email.clone(),
                password: credentials.password().to_string(),
                confirmed: !self.require_confirmation,
            },
        );
        Ok(())
    }

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::SignIn)?;

        let user_id = match inner.users.get(&credentials.email.to_lowercase()) {
            Some(user) if user.password == credentials.password() => {
                if !user.confirmed {
                    return Err(BackendError::Rejected {
                        status: 400,
                        message: "Email not confirmed".into(),
                    });
                }
                user.id.clone()
            }
            _ => {
                return Err(BackendError::Rejected {
                    status: 400,
                    message: "Invalid login credentials".into(),
                })
            }
        };
        inner.issue_session(&user_id, self.token_ttl)
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::Refresh)?;

        // Refresh tokens are single-use.
        let user_id = inner.refresh_tokens.remove(refresh_token).ok_or_else(|| {
            BackendError::Unauthorized("Invalid Refresh Token: Refresh Token Not Found".into())
        })?;
        inner.issue_session(&user_id, self.token_ttl)
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::SignOut)?;

        let user_id = inner.authenticate(access_token)?;
        inner.revoke_user_tokens(&user_id);
        Ok(())
    }

    async fn current_identity(&self, access_token: &str) -> BackendResult<Option<Identity>> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::CurrentIdentity)?;

        let Ok(user_id) = inner.authenticate(access_token) else {
            return Ok(None);
        };
        Ok(inner.user_by_id(&user_id).map(|user| Identity {
            id: user.id.clone(),
            email: Some(user.email.clone()),
        }))
    }
}

#[async_trait]
impl SecretsBackend for MemoryBackend {
    async fn list_secrets(&self, access_token: &str) -> BackendResult<Vec<Secret>> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::ListSecrets)?;

        let user_id = inner.authenticate(access_token)?;
        let mut secrets: Vec<Secret> = inner
            .secrets
            .iter()
            .filter(|s| s.owner == user_id)
            .map(|s| s.secret.clone())
            .collect();
        sort_newest_first(&mut secrets);
        Ok(secrets)
    }

    async fn insert_secret(&self, access_token: &str, secret: &NewSecret) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::InsertSecret)?;

        let user_id = inner.authenticate(access_token)?;
        if secret.user_id != user_id {
            return Err(BackendError::Rejected {
                status: 403,
                message: "new row violates row-level security policy for table \"secrets\""
                    .into(),
            });
        }

        inner.next_secret_id += 1;
        let id = inner.next_secret_id;
        inner.secrets.push(StoredSecret {
            secret: Secret {
                id,
                title: secret.title.clone(),
                value: secret.value.clone(),
                created_at: Some(Utc::now()),
            },
            owner: user_id,
        });
        Ok(())
    }

    async fn delete_secret(&self, access_token: &str, id: SecretId) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::DeleteSecret)?;

        let user_id = inner.authenticate(access_token)?;
        inner
            .secrets
            .retain(|s| !(s.secret.id == id && s.owner == user_id));
        Ok(())
    }

    async fn delete_account(&self, access_token: &str) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.record(Operation::DeleteAccount)?;

        let user_id = inner.authenticate(access_token)?;
        inner.secrets.retain(|s| s.owner != user_id);
        inner.users.retain(|_, user| user.id != user_id);
        inner.revoke_user_tokens(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn signed_in(backend: &MemoryBackend, email: &str) -> Session {
        let creds = Credentials::new(email, "pw");
        backend.sign_up(&creds, None).await.unwrap();
        backend.sign_in(&creds).await.unwrap()
    }

    fn new_secret(session: &Session, title: &str) -> NewSecret {
        NewSecret {
            title: title.into(),
            value: "v".into(),
            user_id: session.user.id.clone(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let backend = MemoryBackend::new();
        let creds = Credentials::new("a@example.com", "pw");
        backend.sign_up(&creds, None).await.unwrap();
        let err = backend.sign_up(&creds, None).await.unwrap_err();
        assert_eq!(err.message(), "User already registered");
    }

    #[tokio::test]
    async fn test_unconfirmed_account_cannot_sign_in() {
        let backend = MemoryBackend::with_email_confirmation();
        let creds = Credentials::new("a@example.com", "pw");
        backend.sign_up(&creds, None).await.unwrap();
        assert_eq!(
            backend.sign_in(&creds).await.unwrap_err().message(),
            "Email not confirmed"
        );
        assert!(backend.confirm_email("a@example.com"));
        assert!(backend.sign_in(&creds).await.is_ok());
    }

    #[tokio::test]
    async fn test_secrets_are_scoped_to_owner() {
        let backend = MemoryBackend::new();
        let a = signed_in(&backend, "a@example.com").await;
        let b = signed_in(&backend, "b@example.com").await;

        backend
            .insert_secret(&a.access_token, &new_secret(&a, "k1"))
            .await
            .unwrap();

        assert_eq!(backend.list_secrets(&a.access_token).await.unwrap().len(), 1);
        assert!(backend.list_secrets(&b.access_token).await.unwrap().is_empty());

        // B cannot delete A's secret; the delete silently matches nothing.
        let id = backend.secrets_for(&a.user.id)[0].id;
        backend.delete_secret(&b.access_token, id).await.unwrap();
        assert_eq!(backend.secrets_for(&a.user.id).len(), 1);
    }

    #[tokio::test]
    async fn test_insert_for_other_owner_rejected() {
        let backend = MemoryBackend::new();
        let a = signed_in(&backend, "a@example.com").await;
        let b = signed_in(&backend, "b@example.com").await;
        let err = backend
            .insert_secret(&a.access_token, &new_secret(&b, "k1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let backend = MemoryBackend::new();
        let session = signed_in(&backend, "a@example.com").await;
        let next = backend.refresh(&session.refresh_token).await.unwrap();
        assert_ne!(next.access_token, session.access_token);
        assert!(matches!(
            backend.refresh(&session.refresh_token).await,
            Err(BackendError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let backend = MemoryBackend::new().with_token_ttl(Duration::seconds(-1));
        let session = signed_in(&backend, "a@example.com").await;
        assert_eq!(
            backend.list_secrets(&session.access_token).await.unwrap_err(),
            BackendError::Unauthorized("JWT expired".into())
        );
        assert!(backend
            .current_identity(&session.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_account_removes_identity_and_secrets() {
        let backend = MemoryBackend::new();
        let a = signed_in(&backend, "a@example.com").await;
        backend
            .insert_secret(&a.access_token, &new_secret(&a, "k1"))
            .await
            .unwrap();

        backend.delete_account(&a.access_token).await.unwrap();

        assert!(!backend.user_exists("a@example.com"));
        assert!(backend.secrets_for(&a.user.id).is_empty());
        assert!(matches!(
            backend.list_secrets(&a.access_token).await,
            Err(BackendError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot_and_counted() {
        let backend = MemoryBackend::new();
        let a = signed_in(&backend, "a@example.com").await;
        backend.fail_next(
            Operation::ListSecrets,
            BackendError::Transport("connection reset".into()),
        );
        assert!(backend.list_secrets(&a.access_token).await.is_err());
        assert!(backend.list_secrets(&a.access_token).await.is_ok());
        assert_eq!(backend.calls(Operation::ListSecrets), 2);
    }
}
