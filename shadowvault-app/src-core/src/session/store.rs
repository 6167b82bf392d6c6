use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::auth::{AuthState, Credentials, Session, SignUpOutcome};
use super::persistence::SessionStorage;
use crate::backend::{Backend, BackendError};
use crate::error::{Result, ShadowVaultError};

/// Single owner of the current session.
///
/// Every change is published on a `watch` channel, so a subscriber always
/// sees the latest [`AuthState`] and a new subscriber sees the current one
/// first.
pub struct SessionStore {
    backend: Arc<dyn Backend>,
    storage: Arc<dyn SessionStorage>,
    state_tx: watch::Sender<AuthState>,
    email_redirect_to: Option<String>,
    initialized: AtomicBool,
}

/// Handle returned by [`SessionStore::subscribe`]. Dropping it unsubscribes.
pub struct SessionSubscription {
    rx: watch::Receiver<AuthState>,
    primed: bool,
}

impl SessionSubscription {
    /// Next auth state. The first call yields the state at subscribe time.
    /// Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<AuthState> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn current(&self) -> AuthState {
        self.rx.borrow().clone()
    }

    pub fn unsubscribe(self) {}
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>, storage: Arc<dyn SessionStorage>) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Resolving);
        Self {
            backend,
            storage,
            state_tx,
            email_redirect_to: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Link target embedded in the verification email sent on sign-up.
    pub fn with_email_redirect(mut self, redirect: Option<String>) -> Self {
        self.email_redirect_to = redirect.filter(|r| !r.trim().is_empty());
        self
    }

    /// Reads the persisted session and leaves `Resolving`. Runs once.
    pub async fn initialize(&self) -> AuthState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.current();
        }

        let persisted = match self.storage.load() {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to restore session, starting signed out: {}", e);
                None
            }
        };

        let resolved = match persisted {
            Some(session) if session.is_expired() => {
                debug!("Persisted session expired, refreshing");
                match self.backend.refresh(&session.refresh_token).await {
                    Ok(fresh) => {
                        self.persist(&fresh);
                        AuthState::SignedIn(fresh)
                    }
                    Err(e) => {
                        warn!("Could not refresh persisted session: {}", e);
                        self.forget();
                        AuthState::SignedOut
                    }
                }
            }
            Some(session) => AuthState::SignedIn(session),
            None => AuthState::SignedOut,
        };

        // A sign-in that finished while we were resolving wins.
        self.state_tx.send_if_modified(|state| {
            if state.is_resolved() {
                return false;
            }
            *state = resolved;
            true
        });

        let state = self.current();
        info!("Session resolved: {}", state);
        state
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.state_tx.subscribe(),
            primed: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state_tx.receiver_count()
    }

    pub fn current(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state_tx.borrow().session().cloned()
    }

    /// Bearer token for data calls.
    pub(crate) fn access_token(&self) -> Result<String> {
        self.state_tx
            .borrow()
            .session()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| ShadowVaultError::Auth("No active session".into()))
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        credentials.validate()?;
        let session = self
            .backend
            .sign_in(credentials)
            .await
            .map_err(ShadowVaultError::auth)?;
        info!("Signed in as {}", session.user.id);
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Registers an account. The session is left untouched.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome> {
        credentials.validate()?;
        self.backend
            .sign_up(credentials, self.email_redirect_to.as_deref())
            .await
            .map_err(ShadowVaultError::auth)?;
        info!("Sign-up submitted, verification pending");
        Ok(SignUpOutcome::VerificationPending {
            email: credentials.email.clone(),
        })
    }

    /// Ends the session. The remote revocation is best-effort; the local
    /// session is always dropped.
    pub async fn sign_out(&self) {
        if let Some(session) = self.session() {
            if let Err(e) = self.backend.sign_out(&session.access_token).await {
                warn!("Remote sign-out failed, clearing local session anyway: {}", e);
            }
        }
        self.set_session(None);
        info!("Signed out");
    }

    /// Exchanges the refresh token for a new session.
    ///
    /// A rejected refresh token ends the session locally. Transport failures
    /// keep the current session so the next tick can retry.
    pub async fn refresh(&self) -> Result<Session> {
        let current = self
            .session()
            .ok_or_else(|| ShadowVaultError::Auth("No active session".into()))?;

        match self.backend.refresh(&current.refresh_token).await {
            Ok(fresh) => {
                // Signed out (or switched user) while the call was in flight.
                let still_current = self
                    .session()
                    .is_some_and(|s| s.refresh_token == current.refresh_token);
                if !still_current {
                    debug!("Discarding refreshed session for a session that has ended");
                    return Err(ShadowVaultError::Auth("Session ended during refresh".into()));
                }
                debug!("Session refreshed for {}", fresh.user.id);
                self.set_session(Some(fresh.clone()));
                Ok(fresh)
            }
            Err(e) if token_rejected(&e) => {
                let msg = e.message();
                warn!("Refresh token rejected, signing out: {}", msg);
                if self
                    .session()
                    .is_some_and(|s| s.refresh_token == current.refresh_token)
                {
                    self.set_session(None);
                }
                Err(ShadowVaultError::Auth(msg))
            }
            Err(e) => Err(ShadowVaultError::auth(e)),
        }
    }

    /// Ends the session locally without contacting the backend.
    pub(crate) fn end_local(&self) {
        self.set_session(None);
    }

    fn set_session(&self, session: Option<Session>) {
        match &session {
            Some(s) => self.persist(s),
            None => self.forget(),
        }

        let next = match session {
            Some(s) => AuthState::SignedIn(s),
            None => AuthState::SignedOut,
        };
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.storage.save(session) {
            warn!("Failed to persist session: {}", e);
        }
    }

    fn forget(&self) {
        if let Err(e) = self.storage.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
    }
}

/// The backend refused the token itself, as opposed to being unreachable.
fn token_rejected(err: &BackendError) -> bool {
    match err {
        BackendError::Unauthorized(_) => true,
        BackendError::Rejected { status, .. } => (400..500).contains(status),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthBackend, MemoryBackend, Operation};
    use crate::session::auth::test_session;
    use crate::session::persistence::MemorySessionStorage;
    use chrono::Duration;

    struct BrokenStorage;

    impl SessionStorage for BrokenStorage {
        fn load(&self) -> Result<Option<Session>> {
            Err(ShadowVaultError::Storage("disk on fire".into()))
        }
        fn save(&self, _session: &Session) -> Result<()> {
            Err(ShadowVaultError::Storage("disk on fire".into()))
        }
        fn clear(&self) -> Result<()> {
            Err(ShadowVaultError::Storage("disk on fire".into()))
        }
    }

    fn store_with(
        backend: Arc<MemoryBackend>,
        storage: Arc<dyn SessionStorage>,
    ) -> SessionStore {
        SessionStore::new(backend, storage)
    }

    async fn registered(backend: &MemoryBackend, email: &str) -> Credentials {
        let creds = Credentials::new(email, "pw-123456");
        backend.sign_up(&creds, None).await.unwrap();
        creds
    }

    #[tokio::test]
    async fn test_initialize_without_session_signs_out() {
        let store = store_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemorySessionStorage::new()),
        );
        assert_eq!(store.current(), AuthState::Resolving);
        assert_eq!(store.initialize().await, AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_initialize_fails_open_on_storage_error() {
        let store = store_with(Arc::new(MemoryBackend::new()), Arc::new(BrokenStorage));
        assert_eq!(store.initialize().await, AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_initialize_restores_persisted_session() {
        let session = test_session("user-1", Duration::hours(1));
        let store = store_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemorySessionStorage::with_session(session.clone())),
        );
        assert_eq!(store.initialize().await, AuthState::SignedIn(session));
    }

    #[tokio::test]
    async fn test_initialize_drops_expired_session_that_cannot_refresh() {
        let storage = Arc::new(MemorySessionStorage::with_session(test_session(
            "user-1",
            Duration::seconds(-10),
        )));
        let store = store_with(Arc::new(MemoryBackend::new()), storage.clone());
        assert_eq!(store.initialize().await, AuthState::SignedOut);
        assert!(storage.stored().is_none());
    }

    #[tokio::test]
    async fn test_initialize_refreshes_expired_session() {
        let backend = Arc::new(MemoryBackend::new());
        let creds = registered(&backend, "agent@example.com").await;
        let mut stale = backend.sign_in(&creds).await.unwrap();
        stale.expires_at = chrono::Utc::now() - Duration::seconds(5);

        let storage = Arc::new(MemorySessionStorage::with_session(stale.clone()));
        let store = store_with(backend.clone(), storage.clone());
        let state = store.initialize().await;

        let fresh = state.session().expect("signed in").clone();
        assert_ne!(fresh.access_token, stale.access_token);
        assert_eq!(storage.stored(), Some(fresh));
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));
        store.initialize().await;

        let creds = registered(&backend, "agent@example.com").await;
        store.sign_in(&creds).await.unwrap();
        // A second initialize must not reset the signed-in state.
        assert!(store.initialize().await.session().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_persists_and_notifies() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Arc::new(MemorySessionStorage::new());
        let store = store_with(backend.clone(), storage.clone());
        store.initialize().await;

        let mut sub = store.subscribe();
        assert_eq!(sub.next().await, Some(AuthState::SignedOut));

        let creds = registered(&backend, "agent@example.com").await;
        let session = store.sign_in(&creds).await.unwrap();

        assert_eq!(sub.next().await, Some(AuthState::SignedIn(session.clone())));
        assert_eq!(storage.stored(), Some(session));
    }

    #[tokio::test]
    async fn test_sign_in_rejects_empty_fields_without_remote_call() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));

        let err = store.sign_in(&Credentials::new("", "")).await.unwrap_err();
        assert!(matches!(err, ShadowVaultError::Validation(_)));
        assert_eq!(backend.calls(Operation::SignIn), 0);
    }

    #[tokio::test]
    async fn test_sign_in_error_is_verbatim() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));
        store.initialize().await;

        let err = store
            .sign_in(&Credentials::new("nobody@example.com", "pw"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(store.current(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_sign_up_does_not_authenticate() {
        let backend = Arc::new(MemoryBackend::with_email_confirmation());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));
        store.initialize().await;

        let outcome = store
            .sign_up(&Credentials::new("agent@example.com", "pw-123456"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SignUpOutcome::VerificationPending {
                email: "agent@example.com".into()
            }
        );
        assert_eq!(store.current(), AuthState::SignedOut);
        assert!(backend.user_exists("agent@example.com"));
    }

    #[tokio::test]
    async fn test_sign_out_survives_remote_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Arc::new(MemorySessionStorage::new());
        let store = store_with(backend.clone(), storage.clone());
        store.initialize().await;
        let creds = registered(&backend, "agent@example.com").await;
        store.sign_in(&creds).await.unwrap();

        backend.fail_next(
            Operation::SignOut,
            BackendError::Transport("connection reset".into()),
        );
        store.sign_out().await;

        assert_eq!(store.current(), AuthState::SignedOut);
        assert!(storage.stored().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_succeeds_when_storage_is_broken() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(BrokenStorage));
        store.initialize().await;
        let creds = registered(&backend, "agent@example.com").await;

        store.sign_in(&creds).await.unwrap();
        assert!(store.session().is_some());
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Arc::new(MemorySessionStorage::new());
        let store = store_with(backend.clone(), storage.clone());
        store.initialize().await;
        let creds = registered(&backend, "agent@example.com").await;
        let first = store.sign_in(&creds).await.unwrap();

        let second = store.refresh().await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(storage.stored(), Some(second));
    }

    #[tokio::test]
    async fn test_rejected_refresh_signs_out() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));
        store.initialize().await;
        let creds = registered(&backend, "agent@example.com").await;
        let session = store.sign_in(&creds).await.unwrap();

        backend.revoke_sessions(&session.user.id);
        assert!(store.refresh().await.unwrap_err().is_auth());
        assert_eq!(store.current(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_session() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemorySessionStorage::new()));
        store.initialize().await;
        let creds = registered(&backend, "agent@example.com").await;
        store.sign_in(&creds).await.unwrap();

        backend.fail_next(Operation::Refresh, BackendError::Transport("offline".into()));
        assert!(store.refresh().await.is_err());
        assert!(store.session().is_some());
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let store = store_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemorySessionStorage::new()),
        );
        let first = store.subscribe();
        let second = store.subscribe();
        assert_eq!(store.subscriber_count(), 2);
        assert_eq!(first.current(), AuthState::Resolving);

        first.unsubscribe();
        drop(second);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_identical_state_is_not_republished() {
        let store = store_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemorySessionStorage::new()),
        );
        store.initialize().await;
        let mut sub = store.subscribe();
        assert_eq!(sub.next().await, Some(AuthState::SignedOut));

        store.end_local();
        assert!(!sub.rx.has_changed().unwrap());
    }
}
