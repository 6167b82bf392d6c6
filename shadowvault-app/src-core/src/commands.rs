//! Operations invoked by the UI layer.
//!
//! Each command returns its result to the caller and mirrors failures onto
//! the event channel as [`UiEvent::Error`], so passive views can show them.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::account::DeletionRequest;
use crate::error::Result;
use crate::events::UiEvent;
use crate::routing::{RouteState, Surface};
use crate::secrets::{ListSnapshot, Mutated, SecretId, SyncStatus};
use crate::session::{Credentials, Identity, SignUpOutcome};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub state: RouteState,
    pub surface: Surface,
    /// Render a neutral loading view instead of any surface.
    pub loading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub route: RouteState,
    pub identity: Option<Identity>,
    pub sync: SyncStatus,
    pub secret_count: usize,
}

fn report<T>(state: &AppState, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        state.emit(UiEvent::from(e));
    }
    result
}

// Routing commands
pub fn get_route(state: &AppState) -> RouteInfo {
    RouteInfo {
        state: state.route_state(),
        surface: state.surface(),
        loading: state.shows_loading(),
    }
}

pub fn navigate(state: &AppState, to: Surface) -> Surface {
    let shown = state.navigate(to);
    state.emit(UiEvent::RouteChanged {
        state: state.route_state(),
        surface: shown,
        redirected_from: (shown != to).then_some(to),
    });
    shown
}

// Session commands
pub async fn sign_in(state: &AppState, email: &str, password: &str) -> Result<Identity> {
    let credentials = Credentials::new(email, password);
    let result = state
        .sessions
        .sign_in(&credentials)
        .await
        .map(|session| session.user);
    state.sync_session();
    report(state, result)
}

pub async fn sign_up(state: &AppState, email: &str, password: &str) -> Result<SignUpOutcome> {
    let credentials = Credentials::new(email, password);
    let result = state.sessions.sign_up(&credentials).await;
    if let Ok(SignUpOutcome::VerificationPending { email }) = &result {
        state.emit(UiEvent::SignedUp {
            email: email.clone(),
        });
    }
    report(state, result)
}

pub async fn sign_out(state: &AppState) {
    state.sessions.sign_out().await;
    state.sync_session();
}

// Secrets commands
pub fn get_secrets(state: &AppState) -> ListSnapshot {
    state.snapshot()
}

pub async fn refresh_secrets(state: &AppState) -> Result<ListSnapshot> {
    let result = state.secrets.reload().await.map(|_| state.snapshot());
    report(state, result)
}

pub async fn add_secret(state: &AppState, title: &str, value: &str) -> Result<()> {
    let result = state.secrets.create(title, value).await;
    report_mutation(state, result)
}

pub async fn delete_secret(state: &AppState, id: SecretId) -> Result<()> {
    let result = state.secrets.delete(id).await;
    report_mutation(state, result)
}

/// The mutation itself decides success. A failed follow-up reload is only
/// reported as an event, so callers never retry a write that landed.
fn report_mutation(state: &AppState, result: Result<Mutated>) -> Result<()> {
    let result = result.map(|mutated| {
        if let Some(e) = mutated.reload_error {
            state.emit(UiEvent::from(&e));
        }
    });
    report(state, result)
}

// Account commands
pub fn request_account_deletion(state: &AppState) -> Result<DeletionRequest> {
    let result = state.account.request_deletion();
    report(state, result)
}

pub fn cancel_account_deletion(state: &AppState, request_id: Uuid) -> bool {
    state.account.abort(request_id)
}

pub async fn confirm_account_deletion(state: &AppState, request_id: Uuid) -> Result<()> {
    let result = state.account.confirm(request_id).await;
    if result.is_ok() {
        state.sync_session();
        state.emit(UiEvent::AccountDeleted);
        info!("Account deletion completed");
    }
    report(state, result)
}

pub fn get_status(state: &AppState) -> StatusInfo {
    let snapshot = state.snapshot();
    StatusInfo {
        route: state.route_state(),
        identity: state.sessions.session().map(|s| s.user),
        sync: snapshot.status(),
        secret_count: snapshot.secrets.len(),
    }
}
