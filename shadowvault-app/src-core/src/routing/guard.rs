//! Route guarding.
//!
//! The guard moves through these states:
//! - `Resolving` → `Authenticated` / `Unauthenticated` (once, when the
//!   session store has read the persisted session)
//! - `Unauthenticated` ↔ `Authenticated` (session changes)
//!
//! It never goes back to `Resolving`.

use serde::{Deserialize, Serialize};

use crate::session::AuthState;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RouteState {
    /// Initial session lookup still running. Show a neutral loading view.
    #[default]
    Resolving,
    Unauthenticated,
    Authenticated,
}

/// Screens the UI can show.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// The secrets list.
    #[default]
    Vault,
    Settings,
    Login,
}

impl Surface {
    /// Protected surfaces require a session.
    pub fn is_protected(self) -> bool {
        !matches!(self, Self::Login)
    }
}

impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolving => write!(f, "Resolving"),
            Self::Unauthenticated => write!(f, "Unauthenticated"),
            Self::Authenticated => write!(f, "Authenticated"),
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vault => write!(f, "vault"),
            Self::Settings => write!(f, "settings"),
            Self::Login => write!(f, "login"),
        }
    }
}

/// Navigation forced by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub from: Surface,
    pub to: Surface,
}

/// Emitted when the guard changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardTransition {
    pub state: RouteState,
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    state: RouteState,
    surface: Surface,
}

impl RouteGuard {
    /// `initial` is the surface the UI opened on.
    pub fn new(initial: Surface) -> Self {
        Self {
            state: RouteState::Resolving,
            surface: initial,
        }
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn shows_loading(&self) -> bool {
        self.state == RouteState::Resolving
    }

    /// Feed one session event. Returns `None` when nothing changed.
    pub fn observe(&mut self, auth: &AuthState) -> Option<GuardTransition> {
        let next = match auth {
            AuthState::Resolving => return None,
            AuthState::SignedOut => RouteState::Unauthenticated,
            AuthState::SignedIn(_) => RouteState::Authenticated,
        };
        if next == self.state {
            return None;
        }

        self.state = next;
        let target = self.allowed(self.surface);
        let redirect = (target != self.surface).then(|| Redirect {
            from: self.surface,
            to: target,
        });
        self.surface = target;

        Some(GuardTransition {
            state: next,
            redirect,
        })
    }

    /// User-initiated navigation. Returns the surface actually shown.
    ///
    /// While resolving the request is recorded as-is and checked once the
    /// session is known.
    pub fn navigate(&mut self, to: Surface) -> Surface {
        self.surface = self.allowed(to);
        self.surface
    }

    fn allowed(&self, to: Surface) -> Surface {
        match self.state {
            RouteState::Resolving => to,
            RouteState::Unauthenticated if to.is_protected() => Surface::Login,
            RouteState::Authenticated if to == Surface::Login => Surface::Vault,
            _ => to,
        }
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(Surface::default())
    }
}
