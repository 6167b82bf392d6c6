//! Session management: who is signed in, and telling everyone when that
//! changes.
//!
//! The store is the only writer of the current session. Other components
//! read it or subscribe to its change stream.

pub mod auth;
pub mod persistence;
pub mod refresh;
pub mod store;

pub use auth::{AuthState, Credentials, Identity, Session, SignUpOutcome};
pub use persistence::{FileSessionStorage, MemorySessionStorage, SessionStorage};
pub use refresh::spawn_refresh_loop;
pub use store::{SessionStore, SessionSubscription};
