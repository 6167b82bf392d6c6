use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::AccountLifecycle;
use crate::backend::Backend;
use crate::events::UiEvent;
use crate::routing::{RouteGuard, RouteState, Surface};
use crate::secrets::{ListSnapshot, ListViewController, SecretsRepository};
use crate::session::{spawn_refresh_loop, AuthState, SessionStorage, SessionStore};
use crate::storage::AppSettings;

/// Capacity of the UI event channel. Slow receivers skip older events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Applies session changes to the route guard and the list.
///
/// Called by the session pump, and directly by commands that change the
/// session so their effects are visible as soon as the command returns.
/// Applying the same state twice is a no-op.
struct SessionSync {
    guard: Mutex<RouteGuard>,
    secrets: Arc<ListViewController>,
    events_tx: broadcast::Sender<UiEvent>,
    /// Identity the list was last loaded for.
    loaded_for: Mutex<Option<String>>,
}

impl SessionSync {
    fn apply(&self, auth: &AuthState) {
        if !auth.is_resolved() {
            return;
        }

        // The guard lock serializes the pump and direct callers.
        let mut guard = self.guard.lock();
        let transition = guard.observe(auth);
        let surface = guard.surface();
        let user = auth.session().map(|s| s.user.id.clone());

        let needs_reload = {
            let mut loaded_for = self.loaded_for.lock();
            let switched = *loaded_for != user;
            *loaded_for = user.clone();
            match user {
                None => {
                    // No network round trip here; the list just empties.
                    self.secrets.clear();
                    false
                }
                Some(_) if switched => {
                    self.secrets.clear();
                    true
                }
                Some(_) => false,
            }
        };
        drop(guard);

        if let Some(transition) = transition {
            info!("Route {} on {}", transition.state, surface);
            let _ = self.events_tx.send(UiEvent::RouteChanged {
                state: transition.state,
                surface,
                redirected_from: transition.redirect.map(|r| r.from),
            });
        }

        if needs_reload {
            let secrets = self.secrets.clone();
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = secrets.reload().await {
                    warn!("Initial list load failed: {}", e);
                    let _ = events_tx.send(UiEvent::from(&e));
                }
            });
        }
    }
}

/// Background tasks bound to the session. Dropping the binding aborts them,
/// which also releases the session subscription.
struct SessionBinding {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct AppState {
    pub settings: AppSettings,
    pub sessions: Arc<SessionStore>,
    pub secrets: Arc<ListViewController>,
    pub account: AccountLifecycle,
    sync: Arc<SessionSync>,
    events_tx: broadcast::Sender<UiEvent>,
    binding: Mutex<Option<SessionBinding>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn Backend>,
        storage: Arc<dyn SessionStorage>,
        settings: AppSettings,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let sessions = Arc::new(
            SessionStore::new(backend.clone(), storage)
                .with_email_redirect(settings.email_redirect_to.clone()),
        );
        let secrets = Arc::new(ListViewController::new(SecretsRepository::new(
            backend.clone(),
            sessions.clone(),
        )));
        let account = AccountLifecycle::new(backend, sessions.clone());
        let sync = Arc::new(SessionSync {
            guard: Mutex::new(RouteGuard::new(Surface::default())),
            secrets: secrets.clone(),
            events_tx: events_tx.clone(),
            loaded_for: Mutex::new(None),
        });

        Self {
            settings,
            sessions,
            secrets,
            account,
            sync,
            events_tx,
            binding: Mutex::new(None),
        }
    }

    /// Binds the session to the UI and resolves the persisted session.
    /// Calling it again while bound only returns the current state.
    pub async fn start(&self) -> AuthState {
        {
            let mut binding = self.binding.lock();
            if binding.is_none() {
                *binding = Some(self.bind());
            }
        }
        let state = self.sessions.initialize().await;
        self.sync.apply(&state);
        state
    }

    /// Tears the binding down. The session itself is kept.
    pub fn shutdown(&self) {
        if self.binding.lock().take().is_some() {
            info!("Session binding released");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.binding.lock().is_some()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UiEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: UiEvent) {
        debug!("Emitting {}", event.name());
        let _ = self.events_tx.send(event);
    }

    pub fn route_state(&self) -> RouteState {
        self.sync.guard.lock().state()
    }

    pub fn surface(&self) -> Surface {
        self.sync.guard.lock().surface()
    }

    pub fn shows_loading(&self) -> bool {
        self.sync.guard.lock().shows_loading()
    }

    pub(crate) fn navigate(&self, to: Surface) -> Surface {
        self.sync.guard.lock().navigate(to)
    }

    /// Applies the current session state right away instead of waiting for
    /// the pump.
    pub(crate) fn sync_session(&self) {
        self.sync.apply(&self.sessions.current());
    }

    pub fn snapshot(&self) -> ListSnapshot {
        self.secrets.snapshot()
    }

    fn bind(&self) -> SessionBinding {
        let mut tasks = Vec::with_capacity(3);

        // Session pump
        let mut subscription = self.sessions.subscribe();
        let sync = self.sync.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(auth) = subscription.next().await {
                debug!("Session event: {}", auth);
                sync.apply(&auth);
            }
        }));

        // List changes to the UI
        let mut list_rx = self.secrets.watch();
        let events_tx = self.events_tx.clone();
        tasks.push(tokio::spawn(async move {
            let mut last_status = list_rx.borrow_and_update().status();
            while list_rx.changed().await.is_ok() {
                let snapshot = list_rx.borrow_and_update().clone();
                let status = snapshot.status();
                let _ = events_tx.send(UiEvent::SecretsUpdated(snapshot));
                if status != last_status {
                    last_status = status;
                    let _ = events_tx.send(UiEvent::SyncStatusChanged(status));
                }
            }
        }));

        tasks.push(spawn_refresh_loop(
            self.sessions.clone(),
            Duration::from_secs(self.settings.refresh_interval_secs.max(1)),
            Duration::from_secs(self.settings.refresh_margin_secs),
        ));

        SessionBinding { tasks }
    }
}
