//! Client core of ShadowVault, a session-gated secrets vault.
//!
//! The pieces, leaf first: [`session::SessionStore`] owns the session and
//! publishes every change, [`routing::RouteGuard`] turns those changes into
//! navigation, [`secrets::SecretsRepository`] talks to the remote collection,
//! and [`secrets::ListViewController`] keeps the visible list in step with
//! it. [`state::AppState`] wires them together for a UI.

pub mod account;
pub mod backend;
pub mod commands;
pub mod error;
pub mod events;
pub mod routing;
pub mod secrets;
pub mod session;
pub mod state;
pub mod storage;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{Result, ShadowVaultError};
pub use events::UiEvent;
pub use state::AppState;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Output goes to stderr so command output stays clean.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shadowvault_app_lib=info,shadowvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
